//! Simple job tracker: a thin status surface for out-of-band workers.
//!
//! Reuses the same KV primitives as the queue manager; external workers
//! that execute jobs outside the worker runtime use it to report progress,
//! results and terminal status. Lifecycle events emitted here flow through
//! the same event bus, so webhook fanout piggybacks unchanged.

use anyhow::Result;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use super::events::{EventKind, JobEvent};
use super::job::{Job, JobStatus};
use super::manager::QueueManager;
use crate::common::ServiceError;
use crate::kernel::tenants::Identity;

/// Filters for the tracker list operation.
#[derive(Debug, Default, Clone)]
pub struct TrackerQuery {
    pub queue: Option<String>,
    pub status: Option<JobStatus>,
    /// Nested predicates parsed from `metadata.<field>=<value>` params.
    pub metadata: Vec<(String, String)>,
    pub limit: usize,
}

/// Fields an out-of-band worker may set.
#[derive(Debug, Default, Deserialize)]
pub struct TrackerUpdate {
    pub progress: Option<Value>,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub status: Option<JobStatus>,
}

/// Extract `metadata.<field>=<value>` predicates from raw query params.
pub fn parse_metadata_predicates(params: &HashMap<String, String>) -> Vec<(String, String)> {
    params
        .iter()
        .filter_map(|(key, value)| {
            key.strip_prefix("metadata.")
                .filter(|field| !field.is_empty())
                .map(|field| (field.to_string(), value.clone()))
        })
        .collect()
}

/// True when every predicate key exists in the metadata object and its
/// value matches (string-compared; scalars compare by their JSON form).
pub fn metadata_matches(metadata: &Value, predicates: &[(String, String)]) -> bool {
    predicates.iter().all(|(field, expected)| {
        match metadata.get(field) {
            Some(Value::String(actual)) => actual == expected,
            Some(other) => other.to_string() == *expected,
            None => false,
        }
    })
}

pub struct TrackerService {
    manager: Arc<QueueManager>,
}

impl TrackerService {
    pub fn new(manager: Arc<QueueManager>) -> Self {
        Self { manager }
    }

    /// Status lookup by job id alone (the tracker does not require the
    /// queue name).
    pub async fn status(&self, identity: &Identity, job_id: &str) -> Result<Job, ServiceError> {
        let job = self
            .manager
            .store()
            .get(job_id)
            .await
            .map_err(|e| ServiceError::action("tracker_status", e))?
            .ok_or_else(|| ServiceError::JobNotFound(job_id.to_string()))?;

        if !identity.can_access_job(&job) {
            return Err(ServiceError::Unauthorized(
                "job belongs to another application".to_string(),
            ));
        }
        Ok(job)
    }

    /// List jobs filtered by queue, status and metadata predicates.
    pub async fn list(
        &self,
        identity: &Identity,
        query: TrackerQuery,
    ) -> Result<Vec<Job>, ServiceError> {
        let queues = match &query.queue {
            Some(queue) => vec![queue.clone()],
            None => self.manager.list_queues(identity),
        };
        let statuses = match query.status {
            Some(status) => vec![status],
            None => vec![
                JobStatus::Waiting,
                JobStatus::Active,
                JobStatus::Delayed,
                JobStatus::Completed,
                JobStatus::Failed,
            ],
        };
        let limit = if query.limit == 0 { 100 } else { query.limit.min(1_000) };

        let mut jobs = Vec::new();
        'outer: for queue in &queues {
            for status in &statuses {
                let batch = self
                    .manager
                    .list_jobs(identity, queue, *status, limit)
                    .await?;
                for job in batch {
                    if metadata_matches(&job.metadata.to_value(), &query.metadata) {
                        jobs.push(job);
                        if jobs.len() >= limit {
                            break 'outer;
                        }
                    }
                }
            }
        }
        Ok(jobs)
    }

    /// Apply an out-of-band update: progress, result, error, or a terminal
    /// status transition.
    pub async fn update(
        &self,
        identity: &Identity,
        job_id: &str,
        update: TrackerUpdate,
    ) -> Result<Job, ServiceError> {
        let mut job = self.status(identity, job_id).await?;

        if job.is_terminal() && update.status.is_some() {
            return Err(ServiceError::Validation(
                "job already reached a terminal state".to_string(),
            ));
        }

        match update.status {
            Some(JobStatus::Completed) => {
                // Out-of-band executions count as at least one attempt.
                job.attempts_made = job.attempts_made.max(1);
                let job = self
                    .manager
                    .complete_job(job, update.result.unwrap_or(Value::Null))
                    .await
                    .map_err(|e| ServiceError::action("tracker_update", e))?;
                return Ok(job);
            }
            Some(JobStatus::Failed) => {
                job.attempts_made = job.attempts_made.max(1);
                job.mark_failed(update.error.unwrap_or_else(|| "failed".to_string()));
                self.manager
                    .store()
                    .finish(&job)
                    .await
                    .map_err(|e| ServiceError::action("tracker_update", e))?;
                self.manager
                    .bus()
                    .emit(JobEvent::from_job(EventKind::Failed, &job));
                return Ok(job);
            }
            Some(other) => {
                return Err(ServiceError::Validation(format!(
                    "tracker updates may only set terminal statuses, got '{}'",
                    other.as_str()
                )));
            }
            None => {}
        }

        let mut dirty = false;
        if let Some(result) = update.result {
            job.result = Some(result);
            dirty = true;
        }
        if let Some(error) = update.error {
            job.failed_reason = Some(error);
            dirty = true;
        }
        if let Some(progress) = update.progress {
            job.progress = progress;
            self.manager
                .store()
                .save_doc(&job)
                .await
                .map_err(|e| ServiceError::action("tracker_update", e))?;
            self.manager
                .bus()
                .emit(JobEvent::from_job(EventKind::Progress, &job));
            return Ok(job);
        }

        if dirty {
            self.manager
                .store()
                .save_doc(&job)
                .await
                .map_err(|e| ServiceError::action("tracker_update", e))?;
        }
        Ok(job)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn metadata_predicates_are_parsed_from_query_params() {
        let mut params = HashMap::new();
        params.insert("queue".to_string(), "email".to_string());
        params.insert("metadata.priority".to_string(), "high".to_string());
        params.insert("metadata.customerId".to_string(), "c-1".to_string());
        params.insert("metadata.".to_string(), "ignored".to_string());

        let mut predicates = parse_metadata_predicates(&params);
        predicates.sort();
        assert_eq!(
            predicates,
            vec![
                ("customerId".to_string(), "c-1".to_string()),
                ("priority".to_string(), "high".to_string()),
            ]
        );
    }

    #[test]
    fn metadata_matching_requires_every_key() {
        let metadata = json!({"priority": "high", "customerId": "c-1"});
        let matching = vec![("priority".to_string(), "high".to_string())];
        let failing = vec![("priority".to_string(), "low".to_string())];
        let missing = vec![("region".to_string(), "eu".to_string())];

        assert!(metadata_matches(&metadata, &matching));
        assert!(!metadata_matches(&metadata, &failing));
        assert!(!metadata_matches(&metadata, &missing));
        assert!(metadata_matches(&metadata, &[]));
    }

    #[test]
    fn non_string_scalars_compare_by_json_form() {
        let metadata = json!({"retries": 3, "testEvent": true});
        assert!(metadata_matches(
            &metadata,
            &[("retries".to_string(), "3".to_string())]
        ));
        assert!(metadata_matches(
            &metadata,
            &[("testEvent".to_string(), "true".to_string())]
        ));
        assert!(!metadata_matches(
            &metadata,
            &[("retries".to_string(), "4".to_string())]
        ));
    }
}
