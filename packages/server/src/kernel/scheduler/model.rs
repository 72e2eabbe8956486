//! Schedule records: deferred HTTP triggers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

use super::cron::{next_fire, validate_cron, validate_timezone};
use crate::common::ServiceError;
use crate::kernel::jobs::Backoff;

pub const MIN_TIMEOUT_SECS: u64 = 1;
pub const MAX_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const MAX_RETRY_ATTEMPTS: u32 = 10;

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_method() -> String {
    "POST".to_string()
}

fn default_true() -> bool {
    true
}

/// The HTTP call a schedule performs when it fires.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointSpec {
    pub url: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl EndpointSpec {
    /// Timeout clamped into the allowed window.
    pub fn clamped_timeout_secs(&self) -> u64 {
        self.timeout_secs.clamp(MIN_TIMEOUT_SECS, MAX_TIMEOUT_SECS)
    }
}

/// When a schedule fires: exactly one of `cron` (recurring) or `at`
/// (one-shot) is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cron: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub at: Option<DateTime<Utc>>,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
}

/// Retry policy applied to the queued execution job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub attempts: u32,
    #[serde(default)]
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Backoff::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Success,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schedule {
    #[serde(rename = "_id")]
    pub schedule_id: String,
    pub name: String,
    pub endpoint: EndpointSpec,
    pub schedule: ScheduleSpec,
    #[serde(default)]
    pub retry_policy: RetryPolicy,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub metadata: Value,
    #[serde(default)]
    pub execution_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_executed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_execution_status: Option<ExecutionStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_execution_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_execution_at: Option<DateTime<Utc>>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Schedule {
    /// Validate and build a schedule, computing its first fire time.
    pub fn create(
        name: String,
        endpoint: EndpointSpec,
        spec: ScheduleSpec,
        retry_policy: RetryPolicy,
        metadata: Value,
        created_by: String,
    ) -> Result<Self, ServiceError> {
        validate(&endpoint, &spec, &retry_policy)?;

        let now = Utc::now();
        let next_execution_at = initial_fire(&spec, now)
            .map_err(|e| ServiceError::Validation(e.to_string()))?;

        Ok(Self {
            schedule_id: format!("sched_{}", Uuid::new_v4().simple()),
            name,
            endpoint,
            schedule: spec,
            retry_policy,
            enabled: true,
            metadata,
            execution_count: 0,
            last_executed_at: None,
            last_execution_status: None,
            last_execution_error: None,
            next_execution_at: Some(next_execution_at),
            created_by,
            created_at: now,
            updated_at: now,
        })
    }

    /// Apply a full update (PUT semantics): re-validate and recompute the
    /// next fire time; execution history is preserved.
    pub fn apply_update(
        &mut self,
        name: String,
        endpoint: EndpointSpec,
        spec: ScheduleSpec,
        retry_policy: RetryPolicy,
        metadata: Value,
    ) -> Result<(), ServiceError> {
        validate(&endpoint, &spec, &retry_policy)?;
        let next = initial_fire(&spec, Utc::now())
            .map_err(|e| ServiceError::Validation(e.to_string()))?;

        self.name = name;
        self.endpoint = endpoint;
        self.schedule = spec;
        self.retry_policy = retry_policy;
        self.metadata = metadata;
        self.next_execution_at = Some(next);
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn is_recurring(&self) -> bool {
        self.schedule.cron.is_some()
    }

    /// Whether the schedule may still fire at `now` given its end-date and
    /// execution-count bounds.
    pub fn within_bounds(&self, now: DateTime<Utc>) -> bool {
        if let Some(end) = self.schedule.end_date {
            if now > end {
                return false;
            }
        }
        if let Some(limit) = self.schedule.limit {
            if self.execution_count >= limit {
                return false;
            }
        }
        true
    }

    /// The fire after `now` for a recurring schedule; `None` for one-shots
    /// (which disable after firing).
    pub fn fire_after(&self, now: DateTime<Utc>) -> Result<Option<DateTime<Utc>>, ServiceError> {
        match &self.schedule.cron {
            Some(expr) => next_fire(expr, &self.schedule.timezone, now)
                .map_err(|e| ServiceError::Validation(e.to_string())),
            None => Ok(None),
        }
    }
}

fn validate(
    endpoint: &EndpointSpec,
    spec: &ScheduleSpec,
    retry_policy: &RetryPolicy,
) -> Result<(), ServiceError> {
    match (&spec.cron, &spec.at) {
        (Some(_), Some(_)) | (None, None) => {
            return Err(ServiceError::Validation(
                "exactly one of 'cron' and 'at' must be set".to_string(),
            ));
        }
        (Some(expr), None) => {
            validate_cron(expr).map_err(|e| ServiceError::Validation(e.to_string()))?;
        }
        (None, Some(_)) => {}
    }

    validate_timezone(&spec.timezone).map_err(|e| ServiceError::Validation(e.to_string()))?;

    url::Url::parse(&endpoint.url)
        .map_err(|_| ServiceError::Validation(format!("invalid endpoint URL '{}'", endpoint.url)))?;
    if !matches!(
        endpoint.method.to_uppercase().as_str(),
        "GET" | "POST" | "PUT" | "PATCH" | "DELETE"
    ) {
        return Err(ServiceError::Validation(format!(
            "unsupported HTTP method '{}'",
            endpoint.method
        )));
    }
    if endpoint.timeout_secs < MIN_TIMEOUT_SECS || endpoint.timeout_secs > MAX_TIMEOUT_SECS {
        return Err(ServiceError::Validation(format!(
            "timeout must be within {}..={} seconds",
            MIN_TIMEOUT_SECS, MAX_TIMEOUT_SECS
        )));
    }

    if retry_policy.attempts < 1 || retry_policy.attempts > MAX_RETRY_ATTEMPTS {
        return Err(ServiceError::Validation(format!(
            "retry attempts must be within 1..={}",
            MAX_RETRY_ATTEMPTS
        )));
    }

    Ok(())
}

/// First fire: the next cron instant, or the literal `at` time (an `at`
/// already in the past fires at the next tick).
fn initial_fire(spec: &ScheduleSpec, now: DateTime<Utc>) -> anyhow::Result<DateTime<Utc>> {
    match (&spec.cron, &spec.at) {
        (Some(expr), None) => next_fire(expr, &spec.timezone, now)?
            .ok_or_else(|| anyhow::anyhow!("cron expression has no future fire")),
        (None, Some(at)) => Ok(*at),
        _ => unreachable!("validated: exactly one of cron/at"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn endpoint() -> EndpointSpec {
        EndpointSpec {
            url: "http://sink.internal/hook".to_string(),
            method: "POST".to_string(),
            headers: HashMap::new(),
            body: None,
            timeout_secs: 30,
        }
    }

    fn cron_spec(expr: &str) -> ScheduleSpec {
        ScheduleSpec {
            cron: Some(expr.to_string()),
            at: None,
            timezone: "UTC".to_string(),
            end_date: None,
            limit: None,
        }
    }

    fn create(spec: ScheduleSpec) -> Result<Schedule, ServiceError> {
        Schedule::create(
            "nightly".to_string(),
            endpoint(),
            spec,
            RetryPolicy::default(),
            json!(null),
            "internal".to_string(),
        )
    }

    #[test]
    fn cron_schedule_gets_an_initial_fire() {
        let schedule = create(cron_spec("*/5 * * * *")).unwrap();
        let next = schedule.next_execution_at.unwrap();
        assert!(next > Utc::now() - Duration::seconds(1));
        assert!(schedule.enabled);
        assert!(schedule.is_recurring());
    }

    #[test]
    fn at_schedule_fires_at_the_given_instant() {
        let at = Utc::now() + Duration::hours(1);
        let spec = ScheduleSpec {
            cron: None,
            at: Some(at),
            timezone: "UTC".to_string(),
            end_date: None,
            limit: None,
        };
        let schedule = create(spec).unwrap();
        assert_eq!(schedule.next_execution_at, Some(at));
        assert!(!schedule.is_recurring());
    }

    #[test]
    fn past_at_is_accepted_and_due_immediately() {
        let at = Utc::now() - Duration::hours(1);
        let spec = ScheduleSpec {
            cron: None,
            at: Some(at),
            timezone: "UTC".to_string(),
            end_date: None,
            limit: None,
        };
        let schedule = create(spec).unwrap();
        assert_eq!(schedule.next_execution_at, Some(at));
    }

    #[test]
    fn both_or_neither_of_cron_and_at_are_rejected() {
        let both = ScheduleSpec {
            cron: Some("* * * * *".to_string()),
            at: Some(Utc::now()),
            timezone: "UTC".to_string(),
            end_date: None,
            limit: None,
        };
        assert!(create(both).is_err());

        let neither = ScheduleSpec {
            cron: None,
            at: None,
            timezone: "UTC".to_string(),
            end_date: None,
            limit: None,
        };
        assert!(create(neither).is_err());
    }

    #[test]
    fn invalid_cron_timezone_url_and_attempts_are_rejected() {
        assert!(create(cron_spec("nonsense")).is_err());

        let mut spec = cron_spec("* * * * *");
        spec.timezone = "Mars/Olympus".to_string();
        assert!(create(spec).is_err());

        let mut bad_endpoint = endpoint();
        bad_endpoint.url = "not a url".to_string();
        assert!(Schedule::create(
            "s".to_string(),
            bad_endpoint,
            cron_spec("* * * * *"),
            RetryPolicy::default(),
            json!(null),
            "internal".to_string(),
        )
        .is_err());

        assert!(Schedule::create(
            "s".to_string(),
            endpoint(),
            cron_spec("* * * * *"),
            RetryPolicy {
                attempts: 11,
                backoff: Backoff::default(),
            },
            json!(null),
            "internal".to_string(),
        )
        .is_err());
    }

    #[test]
    fn timeout_is_clamped_into_bounds() {
        let mut ep = endpoint();
        ep.timeout_secs = 30;
        assert_eq!(ep.clamped_timeout_secs(), 30);
        ep.timeout_secs = 0;
        assert_eq!(ep.clamped_timeout_secs(), 1);
        ep.timeout_secs = 5_000;
        assert_eq!(ep.clamped_timeout_secs(), 300);
    }

    #[test]
    fn bounds_stop_recurrence() {
        let mut schedule = create(cron_spec("* * * * *")).unwrap();
        let now = Utc::now();
        assert!(schedule.within_bounds(now));

        schedule.schedule.limit = Some(2);
        schedule.execution_count = 2;
        assert!(!schedule.within_bounds(now));

        schedule.execution_count = 1;
        assert!(schedule.within_bounds(now));

        schedule.schedule.end_date = Some(now - Duration::minutes(1));
        assert!(!schedule.within_bounds(now));
    }

    #[test]
    fn fire_after_advances_monotonically() {
        let schedule = create(cron_spec("*/5 * * * *")).unwrap();
        let first = schedule.next_execution_at.unwrap();
        let second = schedule.fire_after(first).unwrap().unwrap();
        assert!(second > first);
    }
}
