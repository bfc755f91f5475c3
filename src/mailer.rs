use anyhow::Context;
use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use log::{info, warn};

use crate::models::Ticket;

const DEFAULT_SMTP_HOST: &str = "smtp.mailtrap.io";
const DEFAULT_SMTP_PORT: u16 = 587;
const DEFAULT_FROM: &str = "helpdesk@localhost";

/// Outbound SMTP notifier for ticket assignments. Sending is best effort:
/// failures are logged and never surface to request handlers.
#[derive(Clone)]
pub struct Mailer {
    transport: Option<AsyncSmtpTransport<Tokio1Executor>>,
    from: String,
}

impl Mailer {
    /// Without complete SMTP credentials the mailer starts disabled and
    /// every send becomes a logged no-op.
    pub fn from_env() -> Self {
        let host = std::env::var("SMTP_HOST").unwrap_or_else(|_| DEFAULT_SMTP_HOST.to_string());
        let port = std::env::var("SMTP_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_SMTP_PORT);
        let user = std::env::var("SMTP_USER").unwrap_or_default();
        let password = std::env::var("SMTP_PASSWORD").unwrap_or_default();
        let from = std::env::var("FROM_EMAIL").unwrap_or_else(|_| DEFAULT_FROM.to_string());

        if user.is_empty() || password.is_empty() {
            return Self { transport: None, from };
        }
        let transport = match AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&host) {
            Ok(builder) => Some(
                builder
                    .port(port)
                    .credentials(Credentials::new(user, password))
                    .build(),
            ),
            Err(e) => {
                warn!("invalid SMTP relay '{host}': {e}");
                None
            }
        };
        Self { transport, from }
    }

    pub fn is_enabled(&self) -> bool {
        self.transport.is_some()
    }

    /// Tell a moderator that a ticket landed on their queue.
    pub async fn send_assignment_notice(&self, to: &str, ticket: &Ticket) {
        let Some(transport) = &self.transport else {
            info!("Email configuration incomplete, skipping email notification");
            return;
        };
        if to.is_empty() {
            info!("Email configuration incomplete, skipping email notification");
            return;
        }
        match self.send(transport, to, ticket).await {
            Ok(()) => info!("Assignment notification sent to {to}"),
            Err(e) => warn!("Email sending error: {e:#}"),
        }
    }

    async fn send(
        &self,
        transport: &AsyncSmtpTransport<Tokio1Executor>,
        to: &str,
        ticket: &Ticket,
    ) -> anyhow::Result<()> {
        let from: Mailbox = self.from.parse().context("parsing sender address")?;
        let to: Mailbox = to.parse().context("parsing recipient address")?;
        let (text, html) = assignment_bodies(ticket);
        let message = Message::builder()
            .from(from)
            .to(to)
            .subject(format!("New Ticket Assigned: {}", ticket.title))
            .multipart(MultiPart::alternative_plain_html(text, html))
            .context("building message")?;
        transport.send(message).await.context("sending over SMTP")?;
        Ok(())
    }
}

fn assignment_bodies(ticket: &Ticket) -> (String, String) {
    let ticket_type = ticket.ticket_type.as_deref().unwrap_or("support");
    let notes = ticket.ai_notes.as_deref().unwrap_or("");

    let mut text = format!(
        "You have been assigned a new support ticket.\n\n\
         Title: {}\n\
         Priority: {}\n\
         Type: {}\n\
         Description: {}\n",
        ticket.title,
        ticket.priority.as_str(),
        ticket_type,
        ticket.description,
    );
    if !notes.is_empty() {
        text.push_str(&format!("\nAI Notes: {notes}\n"));
    }
    text.push_str("\nPlease log in to the system to view and manage this ticket.\n");

    let notes_html = if notes.is_empty() {
        String::new()
    } else {
        format!("<p><strong>AI Notes:</strong> {notes}</p>")
    };
    let html = format!(
        "<html><body>\
         <h2>New Ticket Assigned</h2>\
         <p>You have been assigned a new support ticket:</p>\
         <h3>{}</h3>\
         <p><strong>Priority:</strong> {}</p>\
         <p><strong>Type:</strong> {}</p>\
         <p><strong>Description:</strong> {}</p>\
         {}\
         <p>Please log in to the system to view and manage this ticket.</p>\
         </body></html>",
        ticket.title,
        ticket.priority.as_str(),
        ticket_type,
        ticket.description,
        notes_html,
    );
    (text, html)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Ticket, TicketPriority, TicketStatus};
    use chrono::Utc;

    fn ticket() -> Ticket {
        Ticket {
            id: 7,
            title: "Printer on fire".into(),
            description: "Smoke coming out of tray 2".into(),
            status: TicketStatus::Open,
            priority: TicketPriority::Urgent,
            ticket_type: Some("technical".into()),
            required_skills: vec!["hardware".into()],
            ai_notes: Some("Evacuate the building.".into()),
            created_by: 1,
            assigned_to: Some(2),
            created_at: Utc::now(),
            updated_at: None,
        }
    }

    #[test]
    fn bodies_carry_ticket_fields() {
        let (text, html) = assignment_bodies(&ticket());
        for body in [&text, &html] {
            assert!(body.contains("Printer on fire"));
            assert!(body.contains("urgent"));
            assert!(body.contains("technical"));
            assert!(body.contains("Smoke coming out of tray 2"));
            assert!(body.contains("Evacuate the building."));
        }
    }

    #[test]
    fn notes_block_is_omitted_when_empty() {
        let mut t = ticket();
        t.ai_notes = None;
        let (text, html) = assignment_bodies(&t);
        assert!(!text.contains("AI Notes"));
        assert!(!html.contains("AI Notes"));
    }

    #[test]
    fn missing_credentials_disable_the_mailer() {
        std::env::remove_var("SMTP_USER");
        std::env::remove_var("SMTP_PASSWORD");
        let mailer = Mailer::from_env();
        assert!(!mailer.is_enabled());
    }
}
