use std::sync::Arc;

use tracing::{error, info, warn};

use crate::ai::{Analyzer, FALLBACK_NOTES};
use crate::jobs::JobTracker;
use crate::mailer::Mailer;
use crate::models::{Id, Ticket, TriageUpdate, User};
use crate::repo::{Repo, RepoResult, TicketRepo, UserRepo};

/// Ticket lifecycle orchestration: creation, AI triage, moderator
/// assignment, notification and batch retriage.
#[derive(Clone)]
pub struct TicketService {
    repo: Arc<dyn Repo>,
    analyzer: Analyzer,
    mailer: Mailer,
    jobs: JobTracker,
}

impl TicketService {
    pub fn new(repo: Arc<dyn Repo>, analyzer: Analyzer, mailer: Mailer, jobs: JobTracker) -> Self {
        Self { repo, analyzer, mailer, jobs }
    }

    /// Persist a new ticket and kick off detached triage. The caller gets
    /// the pre-analysis ticket back immediately.
    pub async fn create_ticket(
        &self,
        title: String,
        description: String,
        created_by: Id,
    ) -> RepoResult<Ticket> {
        let ticket = self.repo.create_ticket(title, description, created_by).await?;
        let service = self.clone();
        let ticket_id = ticket.id;
        self.jobs.spawn(async move { service.process_ticket(ticket_id).await });
        Ok(ticket)
    }

    /// Run triage for one ticket. Failures are absorbed and logged; the
    /// ticket keeps its pre-analysis defaults when this does not complete.
    pub async fn process_ticket(&self, ticket_id: Id) {
        if let Err(e) = self.try_process(ticket_id).await {
            error!("error processing ticket {ticket_id}: {e:#}");
        }
    }

    async fn try_process(&self, ticket_id: Id) -> anyhow::Result<()> {
        let Some(ticket) = self.repo.get_ticket(ticket_id).await? else {
            return Ok(());
        };
        let analysis = self.analyzer.analyze(&ticket.title, &ticket.description).await;
        let assignee = self.find_matching_moderator(&analysis.required_skills).await?;

        if let Some(assignee) = &assignee {
            // Notify against the post-triage view of the ticket.
            let mut preview = ticket.clone();
            preview.priority = analysis.priority;
            preview.ticket_type = Some(analysis.ticket_type.clone());
            preview.ai_notes = Some(analysis.notes.clone());
            self.mailer.send_assignment_notice(&assignee.email, &preview).await;
        }

        self.repo
            .apply_triage(
                ticket_id,
                TriageUpdate {
                    priority: analysis.priority,
                    ticket_type: analysis.ticket_type,
                    required_skills: analysis.required_skills,
                    ai_notes: analysis.notes,
                    assigned_to: assignee.map(|u| u.id),
                },
            )
            .await?;
        Ok(())
    }

    /// Pick the active moderator whose skills cover the most required skills
    /// (case-insensitive containment, strictly-best wins, earliest id on a
    /// tie). With no skill match at all the first admin gets the ticket.
    pub async fn find_matching_moderator(
        &self,
        required_skills: &[String],
    ) -> RepoResult<Option<User>> {
        let moderators = self.repo.list_active_moderators().await?;
        let mut best: Option<&User> = None;
        let mut max_matches = 0usize;
        for moderator in &moderators {
            if moderator.skills.is_empty() {
                continue;
            }
            let matches = required_skills
                .iter()
                .filter(|req| {
                    let req = req.to_lowercase();
                    moderator.skills.iter().any(|skill| skill.to_lowercase().contains(&req))
                })
                .count();
            if matches > max_matches {
                max_matches = matches;
                best = Some(moderator);
            }
        }
        match best {
            Some(user) => Ok(Some(user.clone())),
            None => self.repo.first_admin().await,
        }
    }

    /// Re-run triage and assignment for every unresolved ticket still
    /// carrying the fallback notes. One bad ticket never aborts the batch;
    /// the returned count covers all candidates that were picked up.
    pub async fn retriage(&self) -> RepoResult<usize> {
        let candidates = self.repo.list_unresolved_with_notes(FALLBACK_NOTES).await?;
        let mut count = 0usize;
        for ticket in candidates {
            if ticket.title.is_empty() || ticket.description.is_empty() {
                warn!("skipping ticket {} in retriage: missing title or description", ticket.id);
            } else {
                self.process_ticket(ticket.id).await;
            }
            count += 1;
        }
        info!("AI re-analysis complete. {count} ticket(s) updated.");
        Ok(count)
    }
}
