//! Subscription records: webhook registrations filtered by event
//! properties.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use uuid::Uuid;

use crate::common::ServiceError;
use crate::kernel::jobs::{EventKind, JobEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum DeliveryMethod {
    #[default]
    Post,
    Put,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_ms: 1_000,
        }
    }
}

/// Event predicates; an unset filter matches everything.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubscriptionFilters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queues: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub statuses: Option<Vec<EventKind>>,
    /// Required key→value pairs in the event metadata; a missing key is a
    /// non-match.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    #[serde(rename = "_id")]
    pub id: String,
    pub application_id: String,
    pub name: String,
    pub endpoint: String,
    #[serde(default)]
    pub method: DeliveryMethod,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub filters: SubscriptionFilters,
    pub events: Vec<EventKind>,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub retry_config: RetryConfig,
    #[serde(default)]
    pub trigger_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_triggered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_true() -> bool {
    true
}

impl Subscription {
    /// Validate and build a subscription for an application.
    #[allow(clippy::too_many_arguments)]
    pub fn create(
        application_id: String,
        name: String,
        endpoint: String,
        method: DeliveryMethod,
        headers: HashMap<String, String>,
        filters: SubscriptionFilters,
        events: Vec<EventKind>,
        retry_config: RetryConfig,
    ) -> Result<Self, ServiceError> {
        validate_endpoint(&endpoint)?;
        if events.is_empty() {
            return Err(ServiceError::Validation(
                "subscription must list at least one event".to_string(),
            ));
        }
        if retry_config.max_attempts == 0 {
            return Err(ServiceError::Validation(
                "retryConfig.maxAttempts must be at least 1".to_string(),
            ));
        }

        let now = Utc::now();
        Ok(Self {
            id: format!("sub_{}", Uuid::new_v4().simple()),
            application_id,
            name,
            endpoint,
            method,
            headers,
            filters,
            events,
            active: true,
            retry_config,
            trigger_count: 0,
            last_triggered_at: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// Whether this subscription matches an event. Pure over typed values:
    /// active, same application, queue filter, status filter, event kind
    /// listed, and every metadata pair present with an equal value.
    pub fn matches(&self, event: &JobEvent) -> bool {
        if !self.active {
            return false;
        }
        if event.application_id != self.application_id {
            return false;
        }
        if let Some(queues) = &self.filters.queues {
            if !queues.iter().any(|q| q == &event.queue) {
                return false;
            }
        }
        if let Some(statuses) = &self.filters.statuses {
            if !statuses.contains(&event.status) {
                return false;
            }
        }
        if !self.events.contains(&event.status) {
            return false;
        }
        if let Some(required) = &self.filters.metadata {
            for (key, expected) in required {
                match event.metadata.get(key) {
                    Some(actual) if actual == expected => {}
                    _ => return false,
                }
            }
        }
        true
    }
}

pub fn validate_endpoint(endpoint: &str) -> Result<(), ServiceError> {
    let parsed = url::Url::parse(endpoint)
        .map_err(|_| ServiceError::Validation(format!("invalid endpoint URL '{}'", endpoint)))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ServiceError::Validation(
            "endpoint URL must be http or https".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn subscription(filters: SubscriptionFilters, events: Vec<EventKind>) -> Subscription {
        Subscription::create(
            "app-1".to_string(),
            "orders".to_string(),
            "https://consumer.example/hook".to_string(),
            DeliveryMethod::Post,
            HashMap::new(),
            filters,
            events,
            RetryConfig::default(),
        )
        .unwrap()
    }

    fn event(queue: &str, status: EventKind, metadata: Value) -> JobEvent {
        JobEvent {
            job_id: "j-1".to_string(),
            queue: queue.to_string(),
            status,
            application_id: "app-1".to_string(),
            data: json!({}),
            metadata,
            result: None,
            error: None,
            progress: None,
            webhooks: None,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn no_filters_matches_every_event_of_the_application() {
        let sub = subscription(
            SubscriptionFilters::default(),
            vec![EventKind::Completed, EventKind::Failed],
        );
        assert!(sub.matches(&event("email", EventKind::Completed, json!({}))));
        assert!(sub.matches(&event("payments", EventKind::Failed, json!({}))));
    }

    #[test]
    fn other_applications_never_match() {
        let sub = subscription(SubscriptionFilters::default(), vec![EventKind::Completed]);
        let mut ev = event("email", EventKind::Completed, json!({}));
        ev.application_id = "app-2".to_string();
        assert!(!sub.matches(&ev));
    }

    #[test]
    fn inactive_subscriptions_never_match() {
        let mut sub = subscription(SubscriptionFilters::default(), vec![EventKind::Completed]);
        sub.active = false;
        assert!(!sub.matches(&event("email", EventKind::Completed, json!({}))));
    }

    #[test]
    fn queue_filter_restricts_matching() {
        let sub = subscription(
            SubscriptionFilters {
                queues: Some(vec!["email".to_string()]),
                ..Default::default()
            },
            vec![EventKind::Completed],
        );
        assert!(sub.matches(&event("email", EventKind::Completed, json!({}))));
        assert!(!sub.matches(&event("webhook", EventKind::Completed, json!({}))));
    }

    #[test]
    fn status_filter_and_event_list_both_apply() {
        let sub = subscription(
            SubscriptionFilters {
                statuses: Some(vec![EventKind::Failed]),
                ..Default::default()
            },
            vec![EventKind::Completed, EventKind::Failed],
        );
        assert!(sub.matches(&event("email", EventKind::Failed, json!({}))));
        // Passes the event list but not the status filter.
        assert!(!sub.matches(&event("email", EventKind::Completed, json!({}))));
        // Not in the event list at all.
        assert!(!sub.matches(&event("email", EventKind::Started, json!({}))));
    }

    #[test]
    fn metadata_filter_requires_equal_values() {
        let mut metadata = Map::new();
        metadata.insert("priority".to_string(), json!("high"));
        let sub = subscription(
            SubscriptionFilters {
                metadata: Some(metadata),
                ..Default::default()
            },
            vec![EventKind::Completed],
        );

        assert!(sub.matches(&event(
            "email",
            EventKind::Completed,
            json!({"priority": "high", "customerId": "c-1"}),
        )));
        assert!(!sub.matches(&event(
            "email",
            EventKind::Completed,
            json!({"priority": "low"}),
        )));
        // Missing key is a non-match.
        assert!(!sub.matches(&event("email", EventKind::Completed, json!({}))));
    }

    #[test]
    fn invalid_endpoints_are_rejected() {
        assert!(validate_endpoint("https://ok.example/hook").is_ok());
        assert!(validate_endpoint("not a url").is_err());
        assert!(validate_endpoint("ftp://files.example/x").is_err());
    }

    #[test]
    fn empty_event_list_is_rejected() {
        let result = Subscription::create(
            "app-1".to_string(),
            "s".to_string(),
            "https://ok.example".to_string(),
            DeliveryMethod::Post,
            HashMap::new(),
            SubscriptionFilters::default(),
            vec![],
            RetryConfig::default(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn method_serializes_uppercase() {
        assert_eq!(
            serde_json::to_string(&DeliveryMethod::Post).unwrap(),
            "\"POST\""
        );
        assert_eq!(
            serde_json::to_string(&DeliveryMethod::Put).unwrap(),
            "\"PUT\""
        );
    }
}
