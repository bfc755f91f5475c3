use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::Utc;

use crate::auth::Role;
use crate::models::*;

#[derive(thiserror::Error, Debug)]
pub enum RepoError {
    #[error("not found")]
    NotFound,
    #[error("conflict")]
    Conflict,
    #[error("internal: {0}")]
    Internal(String),
}

pub type RepoResult<T> = Result<T, RepoError>;

use async_trait::async_trait;

/// Role-dependent ticket visibility used by the listing endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TicketScope {
    /// Every ticket (admins).
    All,
    /// Tickets assigned to this moderator plus unassigned ones.
    Moderator(Id),
    /// Tickets created by this user.
    Creator(Id),
}

#[async_trait]
pub trait UserRepo: Send + Sync {
    async fn create_user(&self, new: NewAccount) -> RepoResult<User>;
    async fn get_user_by_email(&self, email: &str) -> RepoResult<Option<User>>;
    async fn get_user_by_username(&self, username: &str) -> RepoResult<Option<User>>;
    async fn list_users(&self) -> RepoResult<Vec<User>>;
    async fn list_active_moderators(&self) -> RepoResult<Vec<User>>;
    async fn first_admin(&self) -> RepoResult<Option<User>>;
    async fn update_user(&self, id: Id, upd: UpdateUser) -> RepoResult<User>;
}

#[async_trait]
pub trait TicketRepo: Send + Sync {
    async fn create_ticket(
        &self,
        title: String,
        description: String,
        created_by: Id,
    ) -> RepoResult<Ticket>;
    async fn get_ticket(&self, id: Id) -> RepoResult<Option<Ticket>>;
    async fn list_tickets(&self, scope: TicketScope) -> RepoResult<Vec<Ticket>>;
    /// Returns whether a ticket with this id existed and was written.
    async fn set_ticket_status(&self, id: Id, status: TicketStatus) -> RepoResult<bool>;
    async fn apply_triage(&self, id: Id, upd: TriageUpdate) -> RepoResult<()>;
    /// Unresolved tickets whose AI notes equal `notes` exactly.
    async fn list_unresolved_with_notes(&self, notes: &str) -> RepoResult<Vec<Ticket>>;
    async fn ticket_stats(&self) -> RepoResult<TicketStats>;
}

pub trait Repo: UserRepo + TicketRepo {}

impl<T> Repo for T where T: UserRepo + TicketRepo {}

#[cfg(feature = "inmem-store")]
pub mod inmem {
    use super::*;
    use serde::{Deserialize, Serialize};
    use std::path::{Path, PathBuf};

    const SNAPSHOT_PATH: &str = "data/state.json";

    #[derive(Default, Serialize, Deserialize)]
    struct State {
        users: HashMap<Id, User>,
        tickets: HashMap<Id, Ticket>,
        next_id: Id,
    }

    #[derive(Clone)]
    pub struct InMemRepo {
        state: Arc<RwLock<State>>,
        snapshot_path: Arc<PathBuf>,
    }

    impl InMemRepo {
        fn data_dir() -> PathBuf {
            std::env::var("HELPDESK_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("data"))
        }

        fn snapshot_path() -> PathBuf {
            if std::env::var("HELPDESK_DATA_DIR").is_ok() {
                let mut p = Self::data_dir();
                p.push("state.json");
                p
            } else {
                PathBuf::from(SNAPSHOT_PATH)
            }
        }

        fn load_state_from(path: &Path) -> State {
            match std::fs::read(path) {
                Ok(bytes) => match serde_json::from_slice::<State>(&bytes) {
                    Ok(s) => {
                        eprintln!("[inmem] Loaded snapshot '{}'", path.display());
                        s
                    }
                    Err(e) => {
                        eprintln!(
                            "[inmem] Failed to parse snapshot '{}': {e}. Starting empty.",
                            path.display()
                        );
                        State::default()
                    }
                },
                Err(e) => {
                    eprintln!("[inmem] No snapshot at '{}': {e}. Starting empty.", path.display());
                    State::default()
                }
            }
        }

        fn persist(&self) {
            let path = self.snapshot_path.clone();
            if let Ok(s) = serde_json::to_vec_pretty(&*self.state.read().unwrap()) {
                if let Some(dir) = path.parent() {
                    let _ = std::fs::create_dir_all(dir);
                }
                if let Err(e) = std::fs::write(&*path, s) {
                    eprintln!("[inmem] Failed to write snapshot '{}': {e}", path.display());
                }
            }
        }

        pub fn new() -> Self {
            let snapshot_path = Self::snapshot_path();
            let state = Self::load_state_from(&snapshot_path);
            Self {
                state: Arc::new(RwLock::new(state)),
                snapshot_path: Arc::new(snapshot_path),
            }
        }

        fn next_id(state: &mut State) -> Id {
            state.next_id += 1;
            state.next_id
        }
    }

    impl Default for InMemRepo {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl UserRepo for InMemRepo {
        async fn create_user(&self, new: NewAccount) -> RepoResult<User> {
            let mut s = self.state.write().unwrap();
            if s.users
                .values()
                .any(|u| u.email == new.email || u.username == new.username)
            {
                return Err(RepoError::Conflict);
            }
            let id = Self::next_id(&mut s);
            let user = User {
                id,
                email: new.email,
                username: new.username,
                hashed_password: new.hashed_password,
                full_name: new.full_name,
                role: Role::User,
                skills: Vec::new(),
                is_active: true,
                created_at: Utc::now(),
                updated_at: None,
            };
            s.users.insert(id, user.clone());
            drop(s); // release lock before persisting
            self.persist();
            Ok(user)
        }

        async fn get_user_by_email(&self, email: &str) -> RepoResult<Option<User>> {
            let s = self.state.read().unwrap();
            Ok(s.users.values().find(|u| u.email == email).cloned())
        }

        async fn get_user_by_username(&self, username: &str) -> RepoResult<Option<User>> {
            let s = self.state.read().unwrap();
            Ok(s.users.values().find(|u| u.username == username).cloned())
        }

        async fn list_users(&self) -> RepoResult<Vec<User>> {
            let s = self.state.read().unwrap();
            let mut v: Vec<_> = s.users.values().cloned().collect();
            v.sort_by_key(|u| u.id);
            Ok(v)
        }

        async fn list_active_moderators(&self) -> RepoResult<Vec<User>> {
            let s = self.state.read().unwrap();
            let mut v: Vec<_> = s
                .users
                .values()
                .filter(|u| u.role == Role::Moderator && u.is_active)
                .cloned()
                .collect();
            v.sort_by_key(|u| u.id);
            Ok(v)
        }

        async fn first_admin(&self) -> RepoResult<Option<User>> {
            let s = self.state.read().unwrap();
            Ok(s.users
                .values()
                .filter(|u| u.role == Role::Admin)
                .min_by_key(|u| u.id)
                .cloned())
        }

        async fn update_user(&self, id: Id, upd: UpdateUser) -> RepoResult<User> {
            let mut s = self.state.write().unwrap();
            let user = s.users.get_mut(&id).ok_or(RepoError::NotFound)?;
            user.role = upd.role;
            user.skills = upd.skills;
            user.updated_at = Some(Utc::now());
            let updated = user.clone();
            drop(s);
            self.persist();
            Ok(updated)
        }
    }

    #[async_trait]
    impl TicketRepo for InMemRepo {
        async fn create_ticket(
            &self,
            title: String,
            description: String,
            created_by: Id,
        ) -> RepoResult<Ticket> {
            let mut s = self.state.write().unwrap();
            let id = Self::next_id(&mut s);
            let ticket = Ticket {
                id,
                title,
                description,
                status: TicketStatus::Open,
                priority: TicketPriority::Medium,
                ticket_type: None,
                required_skills: Vec::new(),
                ai_notes: None,
                created_by,
                assigned_to: None,
                created_at: Utc::now(),
                updated_at: None,
            };
            s.tickets.insert(id, ticket.clone());
            drop(s);
            self.persist();
            Ok(ticket)
        }

        async fn get_ticket(&self, id: Id) -> RepoResult<Option<Ticket>> {
            let s = self.state.read().unwrap();
            Ok(s.tickets.get(&id).cloned())
        }

        async fn list_tickets(&self, scope: TicketScope) -> RepoResult<Vec<Ticket>> {
            let s = self.state.read().unwrap();
            let mut v: Vec<_> = s
                .tickets
                .values()
                .filter(|t| match scope {
                    TicketScope::All => true,
                    TicketScope::Moderator(id) => {
                        t.assigned_to == Some(id) || t.assigned_to.is_none()
                    }
                    TicketScope::Creator(id) => t.created_by == id,
                })
                .cloned()
                .collect();
            // newest first, ids as tie-breaker
            v.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
            Ok(v)
        }

        async fn set_ticket_status(&self, id: Id, status: TicketStatus) -> RepoResult<bool> {
            let mut s = self.state.write().unwrap();
            let Some(ticket) = s.tickets.get_mut(&id) else {
                return Ok(false);
            };
            ticket.status = status;
            ticket.updated_at = Some(Utc::now());
            drop(s);
            self.persist();
            Ok(true)
        }

        async fn apply_triage(&self, id: Id, upd: TriageUpdate) -> RepoResult<()> {
            let mut s = self.state.write().unwrap();
            let Some(ticket) = s.tickets.get_mut(&id) else {
                // ticket vanished between analysis and writeback
                return Ok(());
            };
            ticket.priority = upd.priority;
            ticket.ticket_type = Some(upd.ticket_type);
            ticket.required_skills = upd.required_skills;
            ticket.ai_notes = Some(upd.ai_notes);
            if upd.assigned_to.is_some() {
                ticket.assigned_to = upd.assigned_to;
            }
            ticket.updated_at = Some(Utc::now());
            drop(s);
            self.persist();
            Ok(())
        }

        async fn list_unresolved_with_notes(&self, notes: &str) -> RepoResult<Vec<Ticket>> {
            let s = self.state.read().unwrap();
            let mut v: Vec<_> = s
                .tickets
                .values()
                .filter(|t| {
                    t.ai_notes.as_deref() == Some(notes) && t.status != TicketStatus::Resolved
                })
                .cloned()
                .collect();
            v.sort_by_key(|t| t.id);
            Ok(v)
        }

        async fn ticket_stats(&self) -> RepoResult<TicketStats> {
            let s = self.state.read().unwrap();
            let mut stats = TicketStats { total: 0, open: 0, in_progress: 0, resolved: 0, urgent: 0 };
            for t in s.tickets.values() {
                stats.total += 1;
                match t.status {
                    TicketStatus::Open => stats.open += 1,
                    TicketStatus::InProgress => stats.in_progress += 1,
                    TicketStatus::Resolved => stats.resolved += 1,
                    TicketStatus::Closed => {}
                }
                if t.priority == TicketPriority::Urgent {
                    stats.urgent += 1;
                }
            }
            Ok(stats)
        }
    }
}

#[cfg(feature = "postgres-store")]
pub mod pg {
    use super::*;
    use sqlx::{Pool, Postgres};

    const USER_COLS: &str =
        "id, email, username, hashed_password, full_name, role, skills, is_active, created_at, updated_at";
    const TICKET_COLS: &str =
        "id, title, description, status, priority, ticket_type, required_skills, ai_notes, created_by, assigned_to, created_at, updated_at";

    #[derive(Clone)]
    pub struct PgRepo {
        pool: Pool<Postgres>,
    }

    impl PgRepo {
        pub fn new(pool: Pool<Postgres>) -> Self {
            Self { pool }
        }
    }

    impl From<sqlx::Error> for RepoError {
        fn from(e: sqlx::Error) -> Self {
            match &e {
                sqlx::Error::RowNotFound => RepoError::NotFound,
                sqlx::Error::Database(db) if db.is_unique_violation() => RepoError::Conflict,
                _ => RepoError::Internal(e.to_string()),
            }
        }
    }

    #[async_trait]
    impl UserRepo for PgRepo {
        async fn create_user(&self, new: NewAccount) -> RepoResult<User> {
            let sql = format!(
                "INSERT INTO users (email, username, hashed_password, full_name) \
                 VALUES ($1, $2, $3, $4) RETURNING {USER_COLS}"
            );
            let user = sqlx::query_as::<_, User>(&sql)
                .bind(&new.email)
                .bind(&new.username)
                .bind(&new.hashed_password)
                .bind(&new.full_name)
                .fetch_one(&self.pool)
                .await?;
            Ok(user)
        }

        async fn get_user_by_email(&self, email: &str) -> RepoResult<Option<User>> {
            let sql = format!("SELECT {USER_COLS} FROM users WHERE email = $1");
            Ok(sqlx::query_as::<_, User>(&sql).bind(email).fetch_optional(&self.pool).await?)
        }

        async fn get_user_by_username(&self, username: &str) -> RepoResult<Option<User>> {
            let sql = format!("SELECT {USER_COLS} FROM users WHERE username = $1");
            Ok(sqlx::query_as::<_, User>(&sql).bind(username).fetch_optional(&self.pool).await?)
        }

        async fn list_users(&self) -> RepoResult<Vec<User>> {
            let sql = format!("SELECT {USER_COLS} FROM users ORDER BY id");
            Ok(sqlx::query_as::<_, User>(&sql).fetch_all(&self.pool).await?)
        }

        async fn list_active_moderators(&self) -> RepoResult<Vec<User>> {
            let sql = format!(
                "SELECT {USER_COLS} FROM users WHERE role = 'moderator' AND is_active ORDER BY id"
            );
            Ok(sqlx::query_as::<_, User>(&sql).fetch_all(&self.pool).await?)
        }

        async fn first_admin(&self) -> RepoResult<Option<User>> {
            let sql =
                format!("SELECT {USER_COLS} FROM users WHERE role = 'admin' ORDER BY id LIMIT 1");
            Ok(sqlx::query_as::<_, User>(&sql).fetch_optional(&self.pool).await?)
        }

        async fn update_user(&self, id: Id, upd: UpdateUser) -> RepoResult<User> {
            let sql = format!(
                "UPDATE users SET role = $2, skills = $3, updated_at = now() \
                 WHERE id = $1 RETURNING {USER_COLS}"
            );
            sqlx::query_as::<_, User>(&sql)
                .bind(id)
                .bind(upd.role)
                .bind(&upd.skills)
                .fetch_optional(&self.pool)
                .await?
                .ok_or(RepoError::NotFound)
        }
    }

    #[async_trait]
    impl TicketRepo for PgRepo {
        async fn create_ticket(
            &self,
            title: String,
            description: String,
            created_by: Id,
        ) -> RepoResult<Ticket> {
            let sql = format!(
                "INSERT INTO tickets (title, description, created_by) \
                 VALUES ($1, $2, $3) RETURNING {TICKET_COLS}"
            );
            let ticket = sqlx::query_as::<_, Ticket>(&sql)
                .bind(&title)
                .bind(&description)
                .bind(created_by)
                .fetch_one(&self.pool)
                .await?;
            Ok(ticket)
        }

        async fn get_ticket(&self, id: Id) -> RepoResult<Option<Ticket>> {
            let sql = format!("SELECT {TICKET_COLS} FROM tickets WHERE id = $1");
            Ok(sqlx::query_as::<_, Ticket>(&sql).bind(id).fetch_optional(&self.pool).await?)
        }

        async fn list_tickets(&self, scope: TicketScope) -> RepoResult<Vec<Ticket>> {
            let rows = match scope {
                TicketScope::All => {
                    let sql = format!(
                        "SELECT {TICKET_COLS} FROM tickets ORDER BY created_at DESC, id DESC"
                    );
                    sqlx::query_as::<_, Ticket>(&sql).fetch_all(&self.pool).await?
                }
                TicketScope::Moderator(id) => {
                    let sql = format!(
                        "SELECT {TICKET_COLS} FROM tickets \
                         WHERE assigned_to = $1 OR assigned_to IS NULL \
                         ORDER BY created_at DESC, id DESC"
                    );
                    sqlx::query_as::<_, Ticket>(&sql).bind(id).fetch_all(&self.pool).await?
                }
                TicketScope::Creator(id) => {
                    let sql = format!(
                        "SELECT {TICKET_COLS} FROM tickets WHERE created_by = $1 \
                         ORDER BY created_at DESC, id DESC"
                    );
                    sqlx::query_as::<_, Ticket>(&sql).bind(id).fetch_all(&self.pool).await?
                }
            };
            Ok(rows)
        }

        async fn set_ticket_status(&self, id: Id, status: TicketStatus) -> RepoResult<bool> {
            let res = sqlx::query("UPDATE tickets SET status = $2, updated_at = now() WHERE id = $1")
                .bind(id)
                .bind(status)
                .execute(&self.pool)
                .await?;
            Ok(res.rows_affected() > 0)
        }

        async fn apply_triage(&self, id: Id, upd: TriageUpdate) -> RepoResult<()> {
            sqlx::query(
                "UPDATE tickets SET priority = $2, ticket_type = $3, required_skills = $4, \
                 ai_notes = $5, assigned_to = COALESCE($6, assigned_to), updated_at = now() \
                 WHERE id = $1",
            )
            .bind(id)
            .bind(upd.priority)
            .bind(&upd.ticket_type)
            .bind(&upd.required_skills)
            .bind(&upd.ai_notes)
            .bind(upd.assigned_to)
            .execute(&self.pool)
            .await?;
            Ok(())
        }

        async fn list_unresolved_with_notes(&self, notes: &str) -> RepoResult<Vec<Ticket>> {
            let sql = format!(
                "SELECT {TICKET_COLS} FROM tickets \
                 WHERE ai_notes = $1 AND status <> 'resolved' ORDER BY id"
            );
            Ok(sqlx::query_as::<_, Ticket>(&sql).bind(notes).fetch_all(&self.pool).await?)
        }

        async fn ticket_stats(&self) -> RepoResult<TicketStats> {
            let stats = sqlx::query_as::<_, TicketStats>(
                "SELECT COUNT(*) AS total, \
                 COUNT(*) FILTER (WHERE status = 'open') AS open, \
                 COUNT(*) FILTER (WHERE status = 'in_progress') AS in_progress, \
                 COUNT(*) FILTER (WHERE status = 'resolved') AS resolved, \
                 COUNT(*) FILTER (WHERE priority = 'urgent') AS urgent \
                 FROM tickets",
            )
            .fetch_one(&self.pool)
            .await?;
            Ok(stats)
        }
    }
}
