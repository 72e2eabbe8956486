//! Webhook fanout: delivers lifecycle events to matching subscriptions.
//!
//! The fanout subscribes to the event bus and never blocks producers:
//! each matching delivery runs as its own spawned task with the
//! subscription's retry policy. Delivery failures are logged and never
//! surfaced back to the job that produced the event.

use chrono::Utc;
use reqwest::Method;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::model::{DeliveryMethod, Subscription};
use super::store::SubscriptionStore;
use crate::kernel::jobs::{EventBus, EventKind, JobEvent};
use crate::kernel::metrics::Metrics;

/// Outcome of a delivery (after retries).
#[derive(Debug, Clone, Serialize)]
pub struct DeliveryOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct SubscriptionFanout {
    store: Arc<SubscriptionStore>,
    http: reqwest::Client,
    metrics: Arc<Metrics>,
}

impl SubscriptionFanout {
    pub fn new(store: Arc<SubscriptionStore>, http: reqwest::Client, metrics: Arc<Metrics>) -> Self {
        Self {
            store,
            http,
            metrics,
        }
    }

    /// Consume the event bus until shutdown. Lagged events are dropped
    /// with a warning; delivery work is spawned off this loop.
    pub async fn run(self: Arc<Self>, bus: EventBus, shutdown: CancellationToken) {
        let mut receiver = bus.subscribe();
        tracing::info!("subscription fanout started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                received = receiver.recv() => match received {
                    Ok(event) => self.clone().dispatch(event).await,
                    Err(RecvError::Lagged(missed)) => {
                        warn!(missed, "fanout lagged behind the event bus");
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }

        tracing::info!("subscription fanout stopped");
    }

    /// Find matching subscriptions and spawn one delivery task per match.
    async fn dispatch(self: Arc<Self>, event: JobEvent) {
        let subscriptions = match self
            .store
            .find_active_for_application(&event.application_id)
            .await
        {
            Ok(subscriptions) => subscriptions,
            Err(e) => {
                warn!(
                    application_id = %event.application_id,
                    error = %e,
                    "failed to load subscriptions for event"
                );
                return;
            }
        };

        for subscription in subscriptions {
            if !subscription.matches(&event) {
                continue;
            }
            let fanout = self.clone();
            let event = event.clone();
            tokio::spawn(async move {
                fanout.deliver(&subscription, &event, true).await;
            });
        }

        // Per-job webhook override carried on the submission.
        if let Some(url) = event
            .webhooks
            .as_ref()
            .and_then(|hooks| hooks.get(event.status.as_str()))
        {
            let fanout = self.clone();
            let url = url.clone();
            tokio::spawn(async move {
                fanout.deliver_job_webhook(&url, &event).await;
            });
        }
    }

    /// Deliver to a job-level callback URL: fixed POST with the default
    /// retry policy, no subscription record involved.
    async fn deliver_job_webhook(&self, url: &str, event: &JobEvent) {
        let payload = build_job_payload(event);
        let retry = super::model::RetryConfig::default();
        let backoff = Duration::from_millis(retry.backoff_ms);

        for attempt in 1..=retry.max_attempts {
            let result = self
                .http
                .post(url)
                .header("X-Job-Id", &event.job_id)
                .header("X-Job-Status", event.status.as_str())
                .header("X-Application-Id", &event.application_id)
                .json(&payload)
                .send()
                .await;

            match result {
                Ok(response) if response.status().as_u16() < 400 => {
                    self.metrics.webhook_delivery(true);
                    debug!(job_id = %event.job_id, url, attempt, "job webhook delivered");
                    return;
                }
                Ok(response) => {
                    warn!(
                        job_id = %event.job_id,
                        url,
                        status = response.status().as_u16(),
                        attempt,
                        "job webhook rejected"
                    );
                }
                Err(e) => {
                    warn!(job_id = %event.job_id, url, attempt, error = %e, "job webhook failed");
                }
            }

            if attempt < retry.max_attempts {
                tokio::time::sleep(backoff).await;
            }
        }
        self.metrics.webhook_delivery(false);
    }

    /// Deliver one event to one subscription, retrying per its retry
    /// config. `record` updates trigger counters on success.
    pub async fn deliver(
        &self,
        subscription: &Subscription,
        event: &JobEvent,
        record: bool,
    ) -> DeliveryOutcome {
        let payload = build_payload(subscription, event);
        let method = match subscription.method {
            DeliveryMethod::Post => Method::POST,
            DeliveryMethod::Put => Method::PUT,
        };
        let max_attempts = subscription.retry_config.max_attempts.max(1);
        let backoff = Duration::from_millis(subscription.retry_config.backoff_ms);

        let mut last_status = None;
        let mut last_error = None;

        for attempt in 1..=max_attempts {
            let mut request = self
                .http
                .request(method.clone(), &subscription.endpoint)
                .header("X-Subscription-Id", &subscription.id)
                .header("X-Job-Id", &event.job_id)
                .header("X-Job-Status", event.status.as_str())
                .header("X-Application-Id", &event.application_id)
                .json(&payload);
            for (name, value) in &subscription.headers {
                request = request.header(name, value);
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status().as_u16();
                    last_status = Some(status);
                    if status < 400 {
                        self.metrics.webhook_delivery(true);
                        if record {
                            if let Err(e) = self.store.record_trigger(&subscription.id).await {
                                warn!(
                                    subscription_id = %subscription.id,
                                    error = %e,
                                    "failed to record trigger"
                                );
                            }
                        }
                        debug!(
                            subscription_id = %subscription.id,
                            job_id = %event.job_id,
                            status,
                            attempt,
                            "webhook delivered"
                        );
                        return DeliveryOutcome {
                            success: true,
                            status: Some(status),
                            attempts: attempt,
                            error: None,
                        };
                    }
                    last_error = Some(format!("endpoint returned HTTP {}", status));
                }
                Err(e) => {
                    last_error = Some(e.to_string());
                }
            }

            if attempt < max_attempts {
                tokio::time::sleep(backoff).await;
            }
        }

        self.metrics.webhook_delivery(false);
        warn!(
            subscription_id = %subscription.id,
            job_id = %event.job_id,
            attempts = max_attempts,
            error = %last_error.as_deref().unwrap_or("unknown"),
            "webhook delivery exhausted retries"
        );
        DeliveryOutcome {
            success: false,
            status: last_status,
            attempts: max_attempts,
            error: last_error,
        }
    }

    /// One synthetic delivery attempt without touching counters.
    pub async fn deliver_test(&self, subscription: &Subscription) -> DeliveryOutcome {
        let event = synthesize_test_event(subscription);
        let mut single_shot = subscription.clone();
        single_shot.retry_config.max_attempts = 1;
        self.deliver(&single_shot, &event, false).await
    }
}

/// The callback body described by the subscription contract.
pub fn build_payload(subscription: &Subscription, event: &JobEvent) -> Value {
    json!({
        "subscription": { "id": subscription.id, "name": subscription.name },
        "event": { "type": event.status.as_str(), "timestamp": event.timestamp },
        "job": job_object(event),
    })
}

/// Body for per-job callback URLs (no subscription involved).
pub fn build_job_payload(event: &JobEvent) -> Value {
    json!({
        "event": { "type": event.status.as_str(), "timestamp": event.timestamp },
        "job": job_object(event),
    })
}

fn job_object(event: &JobEvent) -> Value {
    let mut job = json!({
        "id": event.job_id,
        "queue": event.queue,
        "status": event.status.as_str(),
        "data": event.data,
        "metadata": event.metadata,
    });
    if let Some(result) = &event.result {
        job["result"] = result.clone();
    }
    if let Some(error) = &event.error {
        job["error"] = json!(error);
    }
    job
}

fn synthesize_test_event(subscription: &Subscription) -> JobEvent {
    JobEvent {
        job_id: format!("test-job-{}", Utc::now().timestamp_millis()),
        queue: "test-queue".to_string(),
        status: subscription
            .events
            .first()
            .copied()
            .unwrap_or(EventKind::Created),
        application_id: subscription.application_id.clone(),
        data: json!({}),
        metadata: json!({ "testEvent": true }),
        result: None,
        error: None,
        progress: None,
        webhooks: None,
        timestamp: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::subscriptions::model::{RetryConfig, SubscriptionFilters};
    use std::collections::HashMap;

    fn subscription() -> Subscription {
        Subscription::create(
            "app-1".to_string(),
            "orders".to_string(),
            "https://consumer.example/hook".to_string(),
            DeliveryMethod::Post,
            HashMap::new(),
            SubscriptionFilters::default(),
            vec![EventKind::Completed, EventKind::Failed],
            RetryConfig::default(),
        )
        .unwrap()
    }

    fn completed_event() -> JobEvent {
        JobEvent {
            job_id: "j-1".to_string(),
            queue: "email".to_string(),
            status: EventKind::Completed,
            application_id: "app-1".to_string(),
            data: json!({"to": "u@x"}),
            metadata: json!({"applicationId": "app-1"}),
            result: Some(json!({"messageId": "m-1"})),
            error: None,
            progress: None,
            webhooks: None,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn payload_has_the_documented_shape() {
        let subscription = subscription();
        let payload = build_payload(&subscription, &completed_event());

        assert_eq!(payload["subscription"]["id"], subscription.id.as_str());
        assert_eq!(payload["subscription"]["name"], "orders");
        assert_eq!(payload["event"]["type"], "completed");
        assert_eq!(payload["job"]["id"], "j-1");
        assert_eq!(payload["job"]["queue"], "email");
        assert_eq!(payload["job"]["result"]["messageId"], "m-1");
        assert!(payload["job"].get("error").is_none());
    }

    #[test]
    fn failed_events_carry_the_error_field() {
        let mut event = completed_event();
        event.status = EventKind::Failed;
        event.result = None;
        event.error = Some("boom".to_string());

        let payload = build_payload(&subscription(), &event);
        assert_eq!(payload["job"]["error"], "boom");
        assert!(payload["job"].get("result").is_none());
    }

    #[test]
    fn job_payload_has_no_subscription_section() {
        let payload = build_job_payload(&completed_event());
        assert!(payload.get("subscription").is_none());
        assert_eq!(payload["job"]["id"], "j-1");
        assert_eq!(payload["event"]["type"], "completed");
    }

    #[test]
    fn test_events_are_synthesized_from_the_subscription() {
        let subscription = subscription();
        let event = synthesize_test_event(&subscription);

        assert!(event.job_id.starts_with("test-job-"));
        assert_eq!(event.queue, "test-queue");
        assert_eq!(event.status, EventKind::Completed);
        assert_eq!(event.metadata["testEvent"], true);
        assert!(subscription.matches(&event) || !subscription.active);
    }
}
