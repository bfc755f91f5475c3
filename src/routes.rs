use std::sync::Arc;

use actix_web::{web, HttpResponse};

use crate::auth::{create_token, hash_password, verify_password, Auth, Role};
use crate::error::ApiError;
use crate::models::*;
use crate::repo::{Repo, RepoError, TicketRepo, TicketScope, UserRepo};
use crate::tickets::TicketService;

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api")
            .service(web::resource("/auth/signup").route(web::post().to(signup)))
            .service(web::resource("/auth/login").route(web::post().to(login)))
            .service(web::resource("/auth/me").route(web::get().to(me)))
            .service(
                web::resource("/tickets")
                    .route(web::post().to(create_ticket))
                    .route(web::get().to(list_tickets)),
            )
            // registered before /tickets/{id} so "stats" never parses as an id
            .service(web::resource("/tickets/stats/dashboard").route(web::get().to(ticket_stats)))
            .service(web::resource("/tickets/{id}").route(web::get().to(get_ticket)))
            .service(
                web::resource("/tickets/{id}/status").route(web::patch().to(update_ticket_status)),
            )
            .service(web::resource("/admin/users").route(web::get().to(list_users)))
            .service(web::resource("/admin/users/{id}").route(web::patch().to(update_user)))
            .service(web::resource("/admin/rerun-ai").route(web::post().to(rerun_ai))),
    );
    cfg.route("/", web::get().to(root));
    cfg.route("/health", web::get().to(health));
}

#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<dyn Repo>,
    pub tickets: TicketService,
}

/// Admin-only guard shared by the /admin handlers.
macro_rules! ensure_admin {
    ($auth:expr) => {
        if !matches!($auth.0.role, Role::Admin) {
            return Err(ApiError::Forbidden("Admin access required".into()));
        }
    };
}

// Malformed ids behave like unknown ones.
fn parse_id(raw: &str) -> Option<Id> {
    raw.parse().ok()
}

fn token_response(user: User) -> Result<TokenResponse, ApiError> {
    let access_token = create_token(&user.email).map_err(|_| ApiError::internal())?;
    Ok(TokenResponse {
        access_token,
        token_type: "bearer".to_string(),
        user: UserSummary { id: user.id, email: user.email, username: user.username, role: user.role },
    })
}

pub async fn root() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "message": "AI Ticket Management System API",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running"
    }))
}

pub async fn health() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({ "status": "healthy" }))
}

#[utoipa::path(
    post,
    path = "/api/auth/signup",
    tag = "auth",
    request_body = NewUser,
    responses(
        (status = 200, description = "Account created, token issued", body = TokenResponse),
        (status = 400, description = "Email or username already taken")
    )
)]
pub async fn signup(
    data: web::Data<AppState>,
    payload: web::Json<NewUser>,
) -> Result<HttpResponse, ApiError> {
    let new = payload.into_inner();
    if data.repo.get_user_by_email(&new.email).await?.is_some() {
        return Err(ApiError::BadRequest("Email already registered".into()));
    }
    if data.repo.get_user_by_username(&new.username).await?.is_some() {
        return Err(ApiError::BadRequest("Username already taken".into()));
    }
    let hashed_password = hash_password(&new.password)?;
    let user = data
        .repo
        .create_user(NewAccount {
            email: new.email,
            username: new.username,
            hashed_password,
            full_name: new.full_name,
        })
        .await
        .map_err(|e| match e {
            // lost a signup race after the pre-checks
            RepoError::Conflict => ApiError::BadRequest("Email already registered".into()),
            other => other.into(),
        })?;
    Ok(HttpResponse::Ok().json(token_response(user)?))
}

#[utoipa::path(
    post,
    path = "/api/auth/login",
    tag = "auth",
    request_body = Login,
    responses(
        (status = 200, description = "Token issued", body = TokenResponse),
        (status = 401, description = "Unknown email or wrong password")
    )
)]
pub async fn login(
    data: web::Data<AppState>,
    payload: web::Json<Login>,
) -> Result<HttpResponse, ApiError> {
    let creds = payload.into_inner();
    let user = data
        .repo
        .get_user_by_email(&creds.email)
        .await?
        .filter(|u| verify_password(&creds.password, &u.hashed_password))
        .ok_or_else(|| ApiError::Unauthorized("Incorrect email or password".into()))?;
    Ok(HttpResponse::Ok().json(token_response(user)?))
}

#[utoipa::path(
    get,
    path = "/api/auth/me",
    tag = "auth",
    responses(
        (status = 200, description = "Profile of the authenticated user", body = UserProfile),
        (status = 401, description = "Missing or invalid token")
    )
)]
pub async fn me(auth: Auth) -> Result<HttpResponse, ApiError> {
    Ok(HttpResponse::Ok().json(UserProfile::from(auth.0)))
}

#[utoipa::path(
    post,
    path = "/api/tickets",
    tag = "tickets",
    request_body = NewTicket,
    responses(
        (status = 200, description = "Ticket created; triage runs in the background", body = Ticket),
        (status = 400, description = "Empty title or description"),
        (status = 401, description = "Missing or invalid token")
    )
)]
pub async fn create_ticket(
    auth: Auth,
    data: web::Data<AppState>,
    payload: web::Json<NewTicket>,
) -> Result<HttpResponse, ApiError> {
    let new = payload.into_inner();
    if new.title.is_empty() || new.description.is_empty() {
        return Err(ApiError::BadRequest("Title and description are required".into()));
    }
    let ticket = data.tickets.create_ticket(new.title, new.description, auth.0.id).await?;
    Ok(HttpResponse::Ok().json(ticket))
}

#[utoipa::path(
    get,
    path = "/api/tickets",
    tag = "tickets",
    responses(
        (status = 200, description = "Tickets visible to the caller, newest first", body = [Ticket]),
        (status = 401, description = "Missing or invalid token")
    )
)]
pub async fn list_tickets(auth: Auth, data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let scope = match auth.0.role {
        Role::Admin => TicketScope::All,
        Role::Moderator => TicketScope::Moderator(auth.0.id),
        Role::User => TicketScope::Creator(auth.0.id),
    };
    let tickets = data.repo.list_tickets(scope).await?;
    Ok(HttpResponse::Ok().json(tickets))
}

#[utoipa::path(
    get,
    path = "/api/tickets/{id}",
    tag = "tickets",
    params(("id" = String, Path, description = "Ticket id")),
    responses(
        (status = 200, description = "The ticket", body = Ticket),
        (status = 403, description = "Users may only view their own tickets"),
        (status = 404, description = "No such ticket")
    )
)]
pub async fn get_ticket(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let id = parse_id(&path.into_inner())
        .ok_or_else(|| ApiError::NotFound("Ticket not found".into()))?;
    let ticket = data
        .repo
        .get_ticket(id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Ticket not found".into()))?;
    if auth.0.role == Role::User && ticket.created_by != auth.0.id {
        return Err(ApiError::Forbidden("Not authorized to view this ticket".into()));
    }
    Ok(HttpResponse::Ok().json(ticket))
}

#[utoipa::path(
    patch,
    path = "/api/tickets/{id}/status",
    tag = "tickets",
    params(("id" = String, Path, description = "Ticket id")),
    request_body = UpdateTicketStatus,
    responses(
        (status = 200, description = "Status updated"),
        (status = 403, description = "Caller may not update this ticket"),
        (status = 404, description = "No such ticket")
    )
)]
pub async fn update_ticket_status(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<UpdateTicketStatus>,
) -> Result<HttpResponse, ApiError> {
    if !matches!(auth.0.role, Role::Moderator | Role::Admin) {
        return Err(ApiError::Forbidden("Not authorized to update ticket status".into()));
    }
    let id = parse_id(&path.into_inner())
        .ok_or_else(|| ApiError::NotFound("Ticket not found".into()))?;
    let ticket = data
        .repo
        .get_ticket(id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Ticket not found".into()))?;
    if auth.0.role == Role::Moderator && ticket.assigned_to != Some(auth.0.id) {
        return Err(ApiError::Forbidden("Not authorized to update this ticket".into()));
    }
    let modified = data.repo.set_ticket_status(id, payload.status).await?;
    if !modified {
        return Err(ApiError::Internal("Failed to update ticket status".into()));
    }
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "message": "Ticket status updated successfully"
    })))
}

#[utoipa::path(
    get,
    path = "/api/tickets/stats/dashboard",
    tag = "tickets",
    responses(
        (status = 200, description = "Ticket counts by status and urgency", body = TicketStats),
        (status = 403, description = "Admins only")
    )
)]
pub async fn ticket_stats(auth: Auth, data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    if auth.0.role != Role::Admin {
        return Err(ApiError::Forbidden("Not authorized to view statistics".into()));
    }
    let stats = data.repo.ticket_stats().await?;
    Ok(HttpResponse::Ok().json(stats))
}

#[utoipa::path(
    get,
    path = "/api/admin/users",
    tag = "admin",
    responses(
        (status = 200, description = "All users", body = [UserProfile]),
        (status = 403, description = "Admins only")
    )
)]
pub async fn list_users(auth: Auth, data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    ensure_admin!(auth);
    let users = data.repo.list_users().await?;
    let profiles: Vec<UserProfile> = users.into_iter().map(UserProfile::from).collect();
    Ok(HttpResponse::Ok().json(profiles))
}

#[utoipa::path(
    patch,
    path = "/api/admin/users/{id}",
    tag = "admin",
    params(("id" = String, Path, description = "User id")),
    request_body = UpdateUser,
    responses(
        (status = 200, description = "Updated user", body = UserProfile),
        (status = 403, description = "Admins only"),
        (status = 404, description = "No such user")
    )
)]
pub async fn update_user(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<UpdateUser>,
) -> Result<HttpResponse, ApiError> {
    ensure_admin!(auth);
    let id = parse_id(&path.into_inner())
        .ok_or_else(|| ApiError::NotFound("User not found or update failed".into()))?;
    let updated = data
        .repo
        .update_user(id, payload.into_inner())
        .await
        .map_err(|e| match e {
            RepoError::NotFound => ApiError::NotFound("User not found or update failed".into()),
            other => other.into(),
        })?;
    Ok(HttpResponse::Ok().json(UserProfile::from(updated)))
}

#[utoipa::path(
    post,
    path = "/api/admin/rerun-ai",
    tag = "admin",
    responses(
        (status = 200, description = "Retriage finished, count in the message"),
        (status = 403, description = "Admins only"),
        (status = 500, description = "Retriage failed, cause in the detail")
    )
)]
pub async fn rerun_ai(auth: Auth, data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    ensure_admin!(auth);
    let count = data
        .tickets
        .retriage()
        .await
        .map_err(|e| ApiError::Internal(format!("AI re-analysis failed: {e}")))?;
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "message": format!("AI re-analysis complete. {count} ticket(s) updated.")
    })))
}
