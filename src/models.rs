use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::auth::Role;

pub type Id = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[cfg_attr(
    feature = "postgres-store",
    derive(sqlx::Type),
    sqlx(type_name = "ticket_status", rename_all = "snake_case")
)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    Open,
    InProgress,
    Resolved,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[cfg_attr(
    feature = "postgres-store",
    derive(sqlx::Type),
    sqlx(type_name = "ticket_priority", rename_all = "lowercase")
)]
#[serde(rename_all = "lowercase")]
pub enum TicketPriority {
    Low,
    Medium,
    High,
    Urgent,
}

impl TicketPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            TicketPriority::Low => "low",
            TicketPriority::Medium => "medium",
            TicketPriority::High => "high",
            TicketPriority::Urgent => "urgent",
        }
    }
}

/// Stored user record. Serialized only into snapshots; API responses go
/// through [`UserProfile`] so the password hash never leaves the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "postgres-store", derive(sqlx::FromRow))]
pub struct User {
    pub id: Id,
    pub email: String,
    pub username: String,
    pub hashed_password: String,
    pub full_name: Option<String>,
    pub role: Role,
    pub skills: Vec<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Public view of a user.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct UserProfile {
    pub id: Id,
    pub email: String,
    pub username: String,
    pub full_name: Option<String>,
    pub role: Role,
    pub skills: Vec<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl From<User> for UserProfile {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            email: user.email,
            username: user.username,
            full_name: user.full_name,
            role: user.role,
            skills: user.skills,
            is_active: user.is_active,
            created_at: user.created_at,
            updated_at: user.updated_at,
        }
    }
}

/// Signup payload.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct NewUser {
    pub email: String,
    pub username: String,
    pub password: String,
    pub full_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct Login {
    pub email: String,
    pub password: String,
}

/// Storage-side input for account creation; the password is already hashed.
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub email: String,
    pub username: String,
    pub hashed_password: String,
    pub full_name: Option<String>,
}

/// Admin update of a user's role and skill set.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct UpdateUser {
    pub role: Role,
    #[serde(default)]
    pub skills: Vec<String>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct UserSummary {
    pub id: Id,
    pub email: String,
    pub username: String,
    pub role: Role,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub user: UserSummary,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[cfg_attr(feature = "postgres-store", derive(sqlx::FromRow))]
pub struct Ticket {
    pub id: Id,
    pub title: String,
    pub description: String,
    pub status: TicketStatus,
    pub priority: TicketPriority,
    pub ticket_type: Option<String>,
    pub required_skills: Vec<String>,
    pub ai_notes: Option<String>,
    pub created_by: Id,
    pub assigned_to: Option<Id>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Ticket creation payload. Priority, type and skills are accepted for
/// compatibility but triage owns those fields after creation.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct NewTicket {
    pub title: String,
    pub description: String,
    pub priority: Option<TicketPriority>,
    pub ticket_type: Option<String>,
    pub required_skills: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct UpdateTicketStatus {
    pub status: TicketStatus,
}

/// Fields written back by a triage pass, applied as one update.
#[derive(Debug, Clone)]
pub struct TriageUpdate {
    pub priority: TicketPriority,
    pub ticket_type: String,
    pub required_skills: Vec<String>,
    pub ai_notes: String,
    /// `None` keeps the existing assignee.
    pub assigned_to: Option<Id>,
}

#[derive(Debug, Clone, Copy, Serialize, ToSchema)]
#[cfg_attr(feature = "postgres-store", derive(sqlx::FromRow))]
pub struct TicketStats {
    pub total: i64,
    pub open: i64,
    pub in_progress: i64,
    pub resolved: i64,
    pub urgent: i64,
}
