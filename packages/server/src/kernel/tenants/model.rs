//! Application (tenant) records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Per-application policy settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationSettings {
    /// Queue-name patterns the application may touch. `*` grants all;
    /// a trailing `*` matches a prefix (`email-*`).
    #[serde(default = "default_allowed_queues")]
    pub allowed_queues: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrent_jobs: Option<u32>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub metadata: Value,
}

fn default_allowed_queues() -> Vec<String> {
    vec!["*".to_string()]
}

impl Default for ApplicationSettings {
    fn default() -> Self {
        Self {
            allowed_queues: default_allowed_queues(),
            max_concurrent_jobs: None,
            metadata: Value::Null,
        }
    }
}

/// A tenant identity. The API key itself is never persisted; only its
/// SHA-256 hash is stored for lookup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Application {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    pub api_key_hash: String,
    pub settings: ApplicationSettings,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Application {
    pub fn new(name: String, api_key_hash: String, settings: ApplicationSettings) -> Self {
        let now = Utc::now();
        Self {
            id: format!("app_{}", Uuid::new_v4().simple()),
            name,
            api_key_hash,
            settings,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn allows_queue(&self, queue: &str) -> bool {
        self.settings
            .allowed_queues
            .iter()
            .any(|pattern| queue_pattern_matches(pattern, queue))
    }
}

/// Match a queue name against an allowed-queue pattern.
pub fn queue_pattern_matches(pattern: &str, queue: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    match pattern.strip_suffix('*') {
        Some(prefix) => queue.starts_with(prefix),
        None => pattern == queue,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn app_with_queues(queues: &[&str]) -> Application {
        Application::new(
            "test-app".to_string(),
            "hash".to_string(),
            ApplicationSettings {
                allowed_queues: queues.iter().map(|q| q.to_string()).collect(),
                ..Default::default()
            },
        )
    }

    #[test]
    fn wildcard_allows_everything() {
        let app = app_with_queues(&["*"]);
        assert!(app.allows_queue("email"));
        assert!(app.allows_queue("anything-at-all"));
    }

    #[test]
    fn exact_names_match_exactly() {
        let app = app_with_queues(&["email", "webhook"]);
        assert!(app.allows_queue("email"));
        assert!(app.allows_queue("webhook"));
        assert!(!app.allows_queue("payments"));
        assert!(!app.allows_queue("email-eu"));
    }

    #[test]
    fn trailing_star_matches_prefix() {
        let app = app_with_queues(&["email-*"]);
        assert!(app.allows_queue("email-eu"));
        assert!(app.allows_queue("email-"));
        assert!(!app.allows_queue("email"));
        assert!(!app.allows_queue("webhook"));
    }

    #[test]
    fn default_settings_allow_all_queues() {
        let settings: ApplicationSettings = serde_json::from_str("{}").unwrap();
        assert_eq!(settings.allowed_queues, vec!["*".to_string()]);
    }

    #[test]
    fn ids_carry_app_prefix() {
        let app = app_with_queues(&["*"]);
        assert!(app.id.starts_with("app_"));
    }
}
