use std::time::Duration;

use anyhow::Context;
use serde_json::{json, Value};
use tracing::warn;

use crate::models::TicketPriority;

/// Notes written when analysis cannot run; retriage selects on this value.
pub const FALLBACK_NOTES: &str = "AI analysis unavailable. Please review manually.";

const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com";
const DEFAULT_MODEL: &str = "gemini-1.5-flash";
const DEFAULT_TIMEOUT_SECS: u64 = 30;

const ALLOWED_TICKET_TYPES: &[&str] = &["bug", "feature", "support", "technical", "other"];

/// Structured triage produced for one ticket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Analysis {
    pub priority: TicketPriority,
    pub ticket_type: String,
    pub required_skills: Vec<String>,
    pub notes: String,
}

impl Analysis {
    /// Fixed result used when the model is unreachable or unusable.
    pub fn fallback() -> Self {
        Self {
            priority: TicketPriority::Medium,
            ticket_type: "support".to_string(),
            required_skills: vec!["general".to_string()],
            notes: FALLBACK_NOTES.to_string(),
        }
    }

    /// Coerce a model reply into a valid analysis, field by field.
    fn from_value(v: &Value) -> Self {
        let priority = match v.get("priority").and_then(Value::as_str) {
            Some("low") => TicketPriority::Low,
            Some("medium") => TicketPriority::Medium,
            Some("high") => TicketPriority::High,
            Some("urgent") => TicketPriority::Urgent,
            other => {
                warn!("invalid priority {other:?} in model reply, using medium");
                TicketPriority::Medium
            }
        };
        let ticket_type = match v.get("ticket_type").and_then(Value::as_str) {
            Some(t) if ALLOWED_TICKET_TYPES.contains(&t) => t.to_string(),
            other => {
                warn!("invalid ticket_type {other:?} in model reply, using support");
                "support".to_string()
            }
        };
        let required_skills = match v.get("required_skills").and_then(Value::as_array) {
            Some(items) => items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
            None => {
                warn!("required_skills missing or not a list in model reply, using [general]");
                vec!["general".to_string()]
            }
        };
        let notes = v
            .get("helpful_notes")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        Self { priority, ticket_type, required_skills, notes }
    }
}

/// Gemini-backed ticket triage client.
#[derive(Clone)]
pub struct Analyzer {
    client: reqwest::Client,
    api_base: String,
    api_key: String,
    model: String,
    timeout: Duration,
}

impl Analyzer {
    pub fn from_env() -> Self {
        let timeout = std::env::var("AI_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);
        Self {
            client: reqwest::Client::new(),
            api_base: std::env::var("GEMINI_API_BASE")
                .unwrap_or_else(|_| DEFAULT_API_BASE.to_string()),
            api_key: std::env::var("GEMINI_API_KEY").unwrap_or_default(),
            model: std::env::var("GEMINI_MODEL_NAME").unwrap_or_else(|_| DEFAULT_MODEL.to_string()),
            timeout: Duration::from_secs(timeout),
        }
    }

    /// Analyze a ticket. Never fails: with no API key the call is skipped,
    /// and any transport or parse problem degrades to [`Analysis::fallback`].
    pub async fn analyze(&self, title: &str, description: &str) -> Analysis {
        if self.api_key.is_empty() {
            return Analysis::fallback();
        }
        match self.request_analysis(title, description).await {
            Ok(analysis) => analysis,
            Err(e) => {
                warn!("ticket analysis failed: {e:#}");
                Analysis::fallback()
            }
        }
    }

    async fn request_analysis(&self, title: &str, description: &str) -> anyhow::Result<Analysis> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent?key={}",
            self.api_base, self.model, self.api_key
        );
        let body = json!({
            "contents": [{ "parts": [{ "text": build_prompt(title, description) }] }]
        });
        let response = self
            .client
            .post(&url)
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .context("sending request to Gemini")?
            .error_for_status()
            .context("Gemini returned an error status")?;
        let payload: Value = response.json().await.context("reading Gemini response")?;
        let text = payload
            .pointer("/candidates/0/content/parts/0/text")
            .and_then(Value::as_str)
            .context("no text candidate in Gemini response")?;
        let raw = extract_json(text).context("no JSON object in model reply")?;
        let value: Value = serde_json::from_str(raw).context("model reply is not valid JSON")?;
        Ok(Analysis::from_value(&value))
    }
}

fn build_prompt(title: &str, description: &str) -> String {
    format!(
        r#"Analyze this support ticket and provide structured information:

Title: {title}
Description: {description}

Please provide the following in JSON format:
{{
    "required_skills": ["list", "of", "skills", "needed"],
    "priority": "low|medium|high|urgent",
    "ticket_type": "bug|feature|support|technical|other",
    "helpful_notes": "Detailed notes for the moderator about this ticket"
}}

Base your analysis on:
- Technical complexity
- User impact
- Urgency indicators
- Required expertise
"#
    )
}

/// Slice out the outermost brace span so prose-wrapped replies still parse.
fn extract_json(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&text[start..=end])
}
