#![cfg(feature = "inmem-store")]

use helpdesk::ai::{Analyzer, FALLBACK_NOTES};
use helpdesk::auth::{hash_password, Role};
use helpdesk::jobs::JobTracker;
use helpdesk::mailer::Mailer;
use helpdesk::models::{NewAccount, TicketPriority, TicketStatus, UpdateUser, User};
use helpdesk::repo::inmem::InMemRepo;
use helpdesk::repo::{Repo, TicketRepo, UserRepo};
use helpdesk::tickets::TicketService;
use serial_test::serial;
use std::sync::Arc;
use std::time::Duration;

fn setup_env() {
    let tmp = tempfile::tempdir().unwrap();
    std::env::set_var("HELPDESK_DATA_DIR", tmp.path().to_str().unwrap());
    // no API key: analysis degrades to the deterministic fallback
    std::env::remove_var("GEMINI_API_KEY");
    std::env::remove_var("SMTP_USER");
    std::env::remove_var("SMTP_PASSWORD");
}

fn service(repo: &InMemRepo, jobs: JobTracker) -> TicketService {
    let repo: Arc<dyn Repo> = Arc::new(repo.clone());
    TicketService::new(repo, Analyzer::from_env(), Mailer::from_env(), jobs)
}

async fn seed_user(
    repo: &InMemRepo,
    email: &str,
    username: &str,
    role: Role,
    skills: &[&str],
) -> User {
    let user = repo
        .create_user(NewAccount {
            email: email.into(),
            username: username.into(),
            hashed_password: hash_password("password123!").unwrap(),
            full_name: None,
        })
        .await
        .unwrap();
    if role == Role::User && skills.is_empty() {
        return user;
    }
    repo.update_user(
        user.id,
        UpdateUser { role, skills: skills.iter().map(|s| s.to_string()).collect() },
    )
    .await
    .unwrap()
}

fn skills(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
#[serial]
async fn best_skill_coverage_wins() {
    setup_env();
    let repo = InMemRepo::new();
    seed_user(&repo, "m1@example.com", "m1", Role::Moderator, &["python"]).await;
    let m2 =
        seed_user(&repo, "m2@example.com", "m2", Role::Moderator, &["python", "networking"]).await;
    let svc = service(&repo, JobTracker::new());

    let chosen = svc
        .find_matching_moderator(&skills(&["python", "networking"]))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(chosen.id, m2.id);
}

#[tokio::test]
#[serial]
async fn ties_keep_the_earliest_moderator() {
    setup_env();
    let repo = InMemRepo::new();
    let m1 = seed_user(&repo, "m1@example.com", "m1", Role::Moderator, &["python"]).await;
    seed_user(&repo, "m2@example.com", "m2", Role::Moderator, &["python"]).await;
    let svc = service(&repo, JobTracker::new());

    let chosen = svc.find_matching_moderator(&skills(&["python"])).await.unwrap().unwrap();
    assert_eq!(chosen.id, m1.id);
}

#[tokio::test]
#[serial]
async fn matching_ignores_case_and_accepts_substrings() {
    setup_env();
    let repo = InMemRepo::new();
    let m1 =
        seed_user(&repo, "m1@example.com", "m1", Role::Moderator, &["Python 3", "PostgreSQL"]).await;
    let svc = service(&repo, JobTracker::new());

    let chosen = svc.find_matching_moderator(&skills(&["python"])).await.unwrap().unwrap();
    assert_eq!(chosen.id, m1.id);
}

#[tokio::test]
#[serial]
async fn no_skill_match_falls_back_to_first_admin() {
    setup_env();
    let repo = InMemRepo::new();
    // skill-less moderators never score
    seed_user(&repo, "m1@example.com", "m1", Role::Moderator, &[]).await;
    seed_user(&repo, "m2@example.com", "m2", Role::Moderator, &["haskell"]).await;
    let a1 = seed_user(&repo, "a1@example.com", "a1", Role::Admin, &[]).await;
    seed_user(&repo, "a2@example.com", "a2", Role::Admin, &[]).await;
    let svc = service(&repo, JobTracker::new());

    let chosen = svc.find_matching_moderator(&skills(&["python"])).await.unwrap().unwrap();
    assert_eq!(chosen.id, a1.id);

    // empty requirements cannot score either
    let chosen = svc.find_matching_moderator(&[]).await.unwrap().unwrap();
    assert_eq!(chosen.id, a1.id);
}

#[tokio::test]
#[serial]
async fn nobody_to_assign_yields_none() {
    setup_env();
    let repo = InMemRepo::new();
    seed_user(&repo, "u1@example.com", "u1", Role::User, &[]).await;
    let svc = service(&repo, JobTracker::new());

    assert!(svc.find_matching_moderator(&skills(&["python"])).await.unwrap().is_none());
}

#[tokio::test]
#[serial]
async fn triage_applies_fallback_and_assigns() {
    setup_env();
    let repo = InMemRepo::new();
    let user = seed_user(&repo, "u1@example.com", "u1", Role::User, &[]).await;
    let moderator =
        seed_user(&repo, "mod@example.com", "mod", Role::Moderator, &["general support"]).await;
    let svc = service(&repo, JobTracker::new());

    let ticket = repo
        .create_ticket("Laptop won't boot".into(), "Black screen on power-on".into(), user.id)
        .await
        .unwrap();
    svc.process_ticket(ticket.id).await;

    let after = repo.get_ticket(ticket.id).await.unwrap().unwrap();
    assert_eq!(after.ai_notes.as_deref(), Some(FALLBACK_NOTES));
    assert_eq!(after.priority, TicketPriority::Medium);
    assert_eq!(after.ticket_type.as_deref(), Some("support"));
    assert_eq!(after.required_skills, vec!["general"]);
    // fallback skills read "general", which the moderator's skill contains
    assert_eq!(after.assigned_to, Some(moderator.id));
    assert_eq!(after.status, TicketStatus::Open);
    assert!(after.updated_at.is_some());
}

#[tokio::test]
#[serial]
async fn triage_on_missing_ticket_is_a_no_op() {
    setup_env();
    let repo = InMemRepo::new();
    seed_user(&repo, "mod@example.com", "mod", Role::Moderator, &["general"]).await;
    let svc = service(&repo, JobTracker::new());

    // no panic, no error surfaced
    svc.process_ticket(424242).await;
}

#[tokio::test]
#[serial]
async fn create_ticket_processes_in_the_background() {
    setup_env();
    let repo = InMemRepo::new();
    let user = seed_user(&repo, "u1@example.com", "u1", Role::User, &[]).await;
    seed_user(&repo, "mod@example.com", "mod", Role::Moderator, &["general"]).await;
    let jobs = JobTracker::new();
    let svc = service(&repo, jobs.clone());

    let ticket = svc
        .create_ticket("Slow wifi".into(), "Speed test shows 1 Mbps".into(), user.id)
        .await
        .unwrap();
    // the caller-visible ticket predates analysis
    assert!(ticket.ai_notes.is_none());
    assert!(ticket.assigned_to.is_none());

    jobs.drain(Duration::from_secs(5)).await;

    let after = repo.get_ticket(ticket.id).await.unwrap().unwrap();
    assert_eq!(after.ai_notes.as_deref(), Some(FALLBACK_NOTES));
    assert!(after.assigned_to.is_some());
}
