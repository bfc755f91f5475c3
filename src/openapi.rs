use crate::auth::Role;
use crate::models::{
    Login, NewTicket, NewUser, Ticket, TicketPriority, TicketStats, TicketStatus, TokenResponse,
    UpdateTicketStatus, UpdateUser, UserProfile, UserSummary,
};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::routes::signup,
        crate::routes::login,
        crate::routes::me,
        crate::routes::create_ticket,
        crate::routes::list_tickets,
        crate::routes::get_ticket,
        crate::routes::update_ticket_status,
        crate::routes::ticket_stats,
        crate::routes::list_users,
        crate::routes::update_user,
        crate::routes::rerun_ai,
    ),
    components(schemas(
        NewUser, Login, TokenResponse, UserSummary, UserProfile, UpdateUser,
        Ticket, NewTicket, UpdateTicketStatus, TicketStats,
        Role, TicketStatus, TicketPriority
    )),
    tags(
        (name = "auth", description = "Signup, login and session info"),
        (name = "tickets", description = "Ticket lifecycle operations"),
        (name = "admin", description = "User administration and AI retriage"),
    )
)]
pub struct ApiDoc;
