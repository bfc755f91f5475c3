pub mod ai;
pub mod auth;
pub mod error;
pub mod jobs;
pub mod mailer;
pub mod models;
pub mod openapi;
pub mod repo;
pub mod routes;
pub mod tickets;

// Re-export commonly used items for tests / external users
pub use routes::{config, AppState};
