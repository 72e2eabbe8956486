//! Job lifecycle events and the in-process event bus.
//!
//! # Guarantees
//!
//! - At-least-once to live subscribers; a lagging subscriber drops the
//!   oldest buffered events (`RecvError::Lagged`) and keeps going.
//! - For a given job id, events arrive in emit order (single broadcast
//!   channel).
//! - Subscribers must not block the emitting path: delivery work is spawned
//!   off the receive loop (see `subscriptions::fanout`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::broadcast;

use super::job::Job;

/// Default channel capacity before slow subscribers start lagging.
const DEFAULT_CAPACITY: usize = 10_000;

/// Lifecycle kinds, in state-transition order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Created,
    Started,
    Progress,
    Completed,
    Failed,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Created => "created",
            EventKind::Started => "started",
            EventKind::Progress => "progress",
            EventKind::Completed => "completed",
            EventKind::Failed => "failed",
        }
    }
}

/// A state-transition notification for one job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEvent {
    pub job_id: String,
    pub queue: String,
    pub status: EventKind,
    pub application_id: String,
    pub data: Value,
    /// Submission metadata (standard fields plus caller extras); what
    /// subscription metadata filters evaluate against.
    pub metadata: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<Value>,
    /// Per-job callback overrides carried from the submission
    /// (event name → URL); delivered by the fanout alongside
    /// subscription matches.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhooks: Option<HashMap<String, String>>,
    pub timestamp: DateTime<Utc>,
}

impl JobEvent {
    /// Snapshot an event from the job's current state.
    pub fn from_job(status: EventKind, job: &Job) -> Self {
        Self {
            job_id: job.job_id.clone(),
            queue: job.queue_name.clone(),
            status,
            application_id: job.metadata.application_id.clone(),
            data: job.data.clone(),
            metadata: job.metadata.to_value(),
            result: job.result.clone(),
            error: job.failed_reason.clone(),
            progress: match status {
                EventKind::Progress => Some(job.progress.clone()),
                _ => None,
            },
            webhooks: job.webhooks.clone(),
            timestamp: Utc::now(),
        }
    }
}

/// In-process pub/sub of job lifecycle events.
///
/// A thin typed wrapper over `tokio::sync::broadcast`: cloning shares the
/// channel, subscribing after an emit misses that emit.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<JobEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Emit an event to all subscribers (fire-and-forget). Returns the
    /// number of receivers; an event with no subscribers is dropped.
    pub fn emit(&self, event: JobEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::jobs::job::{JobMetadata, JobStatus};
    use serde_json::json;

    fn sample_job() -> Job {
        Job::builder()
            .queue_name("email")
            .name("email")
            .data(json!({"to": "u@x"}))
            .metadata(JobMetadata {
                application_id: "app-1".to_string(),
                application_name: "test-app".to_string(),
                submitted_at: Utc::now(),
                request_id: "req-1".to_string(),
                extra: serde_json::Map::new(),
            })
            .build()
    }

    #[test]
    fn event_snapshots_job_state() {
        let mut job = sample_job();
        job.mark_completed(json!({"messageId": "m-1"}));
        let event = JobEvent::from_job(EventKind::Completed, &job);

        assert_eq!(event.job_id, job.job_id);
        assert_eq!(event.queue, "email");
        assert_eq!(event.application_id, "app-1");
        assert_eq!(event.result, Some(json!({"messageId": "m-1"})));
        assert!(event.progress.is_none());
    }

    #[test]
    fn progress_events_carry_progress_only() {
        let mut job = sample_job();
        job.progress = json!(40);
        let event = JobEvent::from_job(EventKind::Progress, &job);
        assert_eq!(event.progress, Some(json!(40)));

        job.status = JobStatus::Active;
        let started = JobEvent::from_job(EventKind::Started, &job);
        assert!(started.progress.is_none());
    }

    #[test]
    fn event_kind_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&EventKind::Completed).unwrap(),
            "\"completed\""
        );
    }

    #[tokio::test]
    async fn emit_and_receive() {
        let bus = EventBus::new();
        let mut receiver = bus.subscribe();

        bus.emit(JobEvent::from_job(EventKind::Created, &sample_job()));

        let event = receiver.recv().await.unwrap();
        assert_eq!(event.status, EventKind::Created);
    }

    #[tokio::test]
    async fn multiple_subscribers_see_every_event() {
        let bus = EventBus::new();
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();

        let delivered = bus.emit(JobEvent::from_job(EventKind::Created, &sample_job()));
        assert_eq!(delivered, 2);

        assert_eq!(first.recv().await.unwrap().status, EventKind::Created);
        assert_eq!(second.recv().await.unwrap().status, EventKind::Created);
    }

    #[tokio::test]
    async fn events_for_one_job_arrive_in_emit_order() {
        let bus = EventBus::new();
        let mut receiver = bus.subscribe();
        let job = sample_job();

        for kind in [EventKind::Created, EventKind::Started, EventKind::Completed] {
            bus.emit(JobEvent::from_job(kind, &job));
        }

        assert_eq!(receiver.recv().await.unwrap().status, EventKind::Created);
        assert_eq!(receiver.recv().await.unwrap().status, EventKind::Started);
        assert_eq!(receiver.recv().await.unwrap().status, EventKind::Completed);
    }

    #[test]
    fn emit_without_subscribers_reports_zero() {
        let bus = EventBus::new();
        assert_eq!(
            bus.emit(JobEvent::from_job(EventKind::Created, &sample_job())),
            0
        );
    }
}
