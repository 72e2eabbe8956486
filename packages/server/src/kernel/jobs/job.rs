//! Job model for queued work.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use typed_builder::TypedBuilder;
use uuid::Uuid;

// ============================================================================
// Enums
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    #[default]
    Waiting,
    Active,
    Delayed,
    Completed,
    Failed,
    Paused,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Waiting => "waiting",
            JobStatus::Active => "active",
            JobStatus::Delayed => "delayed",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Paused => "paused",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    #[default]
    Exponential,
    Fixed,
}

/// Retry backoff policy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Backoff {
    #[serde(rename = "type")]
    pub kind: BackoffKind,
    #[serde(rename = "delay")]
    pub delay_ms: u64,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            kind: BackoffKind::Exponential,
            delay_ms: 5_000,
        }
    }
}

impl Backoff {
    /// Delay before the next attempt, given how many attempts have been made.
    ///
    /// Exponential: `delay * 2^(attempts_made - 1)`. Fixed: constant delay.
    pub fn delay_for_attempt(&self, attempts_made: u32) -> u64 {
        match self.kind {
            BackoffKind::Fixed => self.delay_ms,
            BackoffKind::Exponential => {
                let exponent = attempts_made.saturating_sub(1).min(32);
                self.delay_ms.saturating_mul(1u64 << exponent)
            }
        }
    }
}

// ============================================================================
// Options and metadata
// ============================================================================

/// Highest priority a job may request; values are clamped into `0..=MAX`.
pub const MAX_PRIORITY: i64 = 100;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobOptions {
    pub attempts: u32,
    pub backoff: Backoff,
    #[serde(rename = "delay")]
    pub delay_ms: u64,
    pub priority: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Backoff::default(),
            delay_ms: 0,
            priority: 0,
            timeout_ms: None,
        }
    }
}

impl JobOptions {
    pub fn clamped_priority(&self) -> i64 {
        self.priority.clamp(0, MAX_PRIORITY)
    }
}

/// Submission metadata stamped onto every job.
///
/// The four standard fields identify the submitter; any extra keys the
/// caller provided at submission are flattened alongside them and are what
/// subscription metadata filters match against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobMetadata {
    #[serde(rename = "applicationId")]
    pub application_id: String,
    #[serde(rename = "applicationName")]
    pub application_name: String,
    #[serde(rename = "submittedAt")]
    pub submitted_at: DateTime<Utc>,
    #[serde(rename = "requestId")]
    pub request_id: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl JobMetadata {
    /// The full metadata object (standard fields plus caller extras) as a
    /// JSON map, for filter matching and event payloads.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

// ============================================================================
// Job
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct Job {
    #[builder(default = Uuid::new_v4().to_string())]
    pub job_id: String,

    pub queue_name: String,

    /// Handler/type hint (e.g. `webhook`, `email`).
    pub name: String,

    /// Opaque payload, interpreted only by the handler.
    #[builder(default = Value::Null)]
    pub data: Value,

    #[serde(rename = "_metadata")]
    pub metadata: JobMetadata,

    #[builder(default)]
    pub options: JobOptions,

    #[builder(default)]
    pub status: JobStatus,

    #[builder(default = 0)]
    pub attempts_made: u32,

    /// 0..100 or an arbitrary JSON progress report.
    #[builder(default = Value::from(0))]
    pub progress: Value,

    #[builder(default, setter(strip_option))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    #[builder(default, setter(strip_option))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_reason: Option<String>,

    #[builder(default = Utc::now())]
    pub created_at: DateTime<Utc>,

    #[builder(default, setter(strip_option))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<DateTime<Utc>>,

    #[builder(default, setter(strip_option))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,

    /// Per-job webhook overrides: lifecycle event name → callback URL.
    #[builder(default, setter(strip_option))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhooks: Option<HashMap<String, String>>,
}

impl Job {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Whether another attempt is allowed after a retryable failure.
    pub fn has_attempts_remaining(&self) -> bool {
        self.attempts_made < self.options.attempts
    }

    /// Delay before the next retry, per the job's backoff policy.
    pub fn next_retry_delay_ms(&self) -> u64 {
        self.options.backoff.delay_for_attempt(self.attempts_made)
    }

    /// Transition into the completed terminal state.
    pub fn mark_completed(&mut self, result: Value) {
        self.status = JobStatus::Completed;
        self.result = Some(result);
        self.finished_at = Some(Utc::now());
    }

    /// Transition into the failed terminal state.
    pub fn mark_failed(&mut self, reason: String) {
        self.status = JobStatus::Failed;
        self.failed_reason = Some(reason);
        self.finished_at = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_metadata() -> JobMetadata {
        JobMetadata {
            application_id: "app-1".to_string(),
            application_name: "test-app".to_string(),
            submitted_at: Utc::now(),
            request_id: "req-1".to_string(),
            extra: Map::new(),
        }
    }

    fn sample_job() -> Job {
        Job::builder()
            .queue_name("email")
            .name("email")
            .data(json!({"to": "u@x", "subject": "hi", "body": "hello"}))
            .metadata(sample_metadata())
            .build()
    }

    #[test]
    fn new_job_starts_waiting_with_zero_attempts() {
        let job = sample_job();
        assert_eq!(job.status, JobStatus::Waiting);
        assert_eq!(job.attempts_made, 0);
        assert!(!job.is_terminal());
    }

    #[test]
    fn exponential_backoff_doubles_per_attempt() {
        let backoff = Backoff {
            kind: BackoffKind::Exponential,
            delay_ms: 1_000,
        };
        assert_eq!(backoff.delay_for_attempt(1), 1_000);
        assert_eq!(backoff.delay_for_attempt(2), 2_000);
        assert_eq!(backoff.delay_for_attempt(3), 4_000);
    }

    #[test]
    fn fixed_backoff_is_constant() {
        let backoff = Backoff {
            kind: BackoffKind::Fixed,
            delay_ms: 500,
        };
        assert_eq!(backoff.delay_for_attempt(1), 500);
        assert_eq!(backoff.delay_for_attempt(5), 500);
    }

    #[test]
    fn exponential_backoff_saturates_instead_of_overflowing() {
        let backoff = Backoff {
            kind: BackoffKind::Exponential,
            delay_ms: u64::MAX / 2,
        };
        let delay = backoff.delay_for_attempt(64);
        assert_eq!(delay, u64::MAX);
    }

    #[test]
    fn priority_is_clamped() {
        let mut options = JobOptions::default();
        options.priority = 500;
        assert_eq!(options.clamped_priority(), 100);
        options.priority = -3;
        assert_eq!(options.clamped_priority(), 0);
    }

    #[test]
    fn completed_jobs_carry_result_and_finish_time() {
        let mut job = sample_job();
        job.attempts_made = 1;
        job.mark_completed(json!({"messageId": "m-1"}));
        assert_eq!(job.status, JobStatus::Completed);
        assert!(job.result.is_some());
        assert!(job.finished_at.is_some());
    }

    #[test]
    fn failed_jobs_carry_reason() {
        let mut job = sample_job();
        job.attempts_made = 3;
        job.mark_failed("connection refused".to_string());
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.failed_reason.as_deref(), Some("connection refused"));
    }

    #[test]
    fn attempts_remaining_respects_limit() {
        let mut job = sample_job();
        job.options.attempts = 2;
        job.attempts_made = 1;
        assert!(job.has_attempts_remaining());
        job.attempts_made = 2;
        assert!(!job.has_attempts_remaining());
    }

    #[test]
    fn metadata_flattens_extra_keys() {
        let mut metadata = sample_metadata();
        metadata
            .extra
            .insert("priority".to_string(), json!("high"));
        let value = metadata.to_value();
        assert_eq!(value["applicationId"], "app-1");
        assert_eq!(value["priority"], "high");
    }

    #[test]
    fn job_serializes_metadata_under_underscore_key() {
        let job = sample_job();
        let value = serde_json::to_value(&job).unwrap();
        assert!(value.get("_metadata").is_some());
        assert_eq!(value["status"], "waiting");
    }

    #[test]
    fn status_roundtrips_lowercase() {
        for status in [
            JobStatus::Waiting,
            JobStatus::Active,
            JobStatus::Delayed,
            JobStatus::Completed,
            JobStatus::Failed,
            JobStatus::Paused,
        ] {
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{}\"", status.as_str()));
            let back: JobStatus = serde_json::from_str(&json).unwrap();
            assert_eq!(back, status);
        }
    }
}
