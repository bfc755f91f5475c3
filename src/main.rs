use actix_cors::Cors;
use actix_web::{web, App, HttpServer, middleware::Compress};
use utoipa_swagger_ui::SwaggerUi;

mod ai;
mod auth;
mod error;
mod jobs;
mod mailer;
mod models;
mod openapi;
mod repo;
mod routes;
mod tickets;

use ai::Analyzer;
use jobs::JobTracker;
use mailer::Mailer;
use openapi::ApiDoc;
#[cfg(all(feature = "inmem-store", not(feature = "postgres-store")))]
use repo::inmem::InMemRepo;
use repo::Repo;
use routes::{config, AppState};
use std::sync::Arc;
use std::time::Duration;
use tickets::TicketService;
use tracing::{info, Level};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::EnvFilter;
use utoipa::OpenApi; // bring trait into scope for ApiDoc::openapi()

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Environment variables must be set externally (shell, systemd, Docker, etc.)
    // Load .env automatically only in debug builds to reduce manual setup overhead.
    if cfg!(debug_assertions) {
        let _ = dotenv::dotenv();
    }

    // Validate required environment variables
    validate_env_vars();

    // Structured logging initialisation
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    info!("Bootstrapping helpdesk server");

    // Log loaded configuration (non-sensitive)
    info!(
        "Gemini triage configured: {}",
        std::env::var("GEMINI_API_KEY").map(|v| !v.is_empty()).unwrap_or(false)
    );
    info!(
        "SMTP notifications configured: {}",
        std::env::var("SMTP_USER").map(|v| !v.is_empty()).unwrap_or(false)
            && std::env::var("SMTP_PASSWORD").map(|v| !v.is_empty()).unwrap_or(false)
    );

    #[cfg(all(feature = "inmem-store", not(feature = "postgres-store")))]
    let repo = InMemRepo::new();
    #[cfg(all(feature = "inmem-store", not(feature = "postgres-store")))]
    info!("Using in-memory repository backend");

    #[cfg(feature = "postgres-store")]
    let repo = {
        use sqlx::postgres::PgPoolOptions;
        let db_url =
            std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for postgres-store");
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(&db_url)
            .await
            .expect("Failed to connect to Postgres");
        sqlx::migrate!().run(&pool).await.expect("Failed to run migrations");
        info!("Using Postgres repository backend");
        crate::repo::pg::PgRepo::new(pool)
    };

    let repo: Arc<dyn Repo> = Arc::new(repo);
    let jobs = JobTracker::new();
    let service =
        TicketService::new(repo.clone(), Analyzer::from_env(), Mailer::from_env(), jobs.clone());

    let openapi = ApiDoc::openapi();
    info!("OpenAPI spec generated");

    let bind_addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8000".to_string());

    let server = HttpServer::new(move || {
        App::new()
            .wrap(TracingLogger::default())
            .wrap(Compress::default())
            // browser clients come from arbitrary origins
            .wrap(Cors::permissive())
            .configure(config)
            .service(SwaggerUi::new("/docs").url("/docs/openapi.json", openapi.clone()))
            .app_data(web::Data::new(AppState {
                repo: repo.clone(),
                tickets: service.clone(),
            }))
    })
    .bind(&bind_addr)?;

    info!("Listening on http://{bind_addr}");

    server.run().await?;

    // Give outstanding triage and notification jobs a bounded window to finish.
    let drain = Duration::from_secs(
        std::env::var("SHUTDOWN_DRAIN_SECS").ok().and_then(|v| v.parse().ok()).unwrap_or(30),
    );
    info!("Draining background jobs (up to {drain:?})");
    jobs.drain(drain).await;
    Ok(())
}

/// Validate that required environment variables are set
fn validate_env_vars() {
    use std::env;

    // Required variables that must be set
    let required = vec!["JWT_SECRET"];

    let mut missing = Vec::new();
    for var in required {
        if env::var(var).is_err() {
            missing.push(var);
        }
    }
    #[cfg(feature = "postgres-store")]
    if env::var("DATABASE_URL").is_err() {
        missing.push("DATABASE_URL");
    }

    if !missing.is_empty() {
        eprintln!("Missing required environment variables: {:?}", missing);
        eprintln!("Please copy .env.example to .env and configure it");
        std::process::exit(1);
    }

    // Validate JWT_SECRET is sufficiently long
    if let Ok(secret) = env::var("JWT_SECRET") {
        if secret.len() < 32 {
            eprintln!("JWT_SECRET must be at least 32 characters long for security");
            std::process::exit(1);
        }
    }

    // Warn about optional integrations
    if env::var("GEMINI_API_KEY").map(|v| v.is_empty()).unwrap_or(true) {
        eprintln!("Warning: GEMINI_API_KEY not set, ticket triage will use the fallback analysis");
    }
    if env::var("SMTP_USER").map(|v| v.is_empty()).unwrap_or(true)
        || env::var("SMTP_PASSWORD").map(|v| v.is_empty()).unwrap_or(true)
    {
        eprintln!("Warning: SMTP credentials not set, assignment notifications will be skipped");
    }
}
