//! Queue manager: the public queue contract.
//!
//! Owns the registry of named queues (created lazily on first reference)
//! and every job state transition. Workers and the scheduler receive the
//! manager explicitly; there is no ambient global queue state.
//!
//! State machine per job:
//!
//! ```text
//!   created ──(enqueue)──▶ waiting ──(reserve)──▶ active
//!                          ▲                      │
//!                          │                      ├─(complete)──▶ completed
//!   delayed ──(due sweep)──┘                      ├─(fail, attempts left)─▶ delayed
//!                                                 └─(fail, exhausted)──▶ failed
//! ```

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::events::{EventBus, EventKind, JobEvent};
use super::job::{Backoff, Job, JobMetadata, JobOptions, JobStatus};
use super::registry::{ErrorKind, HandlerFailure, ProgressReporter};
use super::store::{JobStore, QueueStats, TerminalBucket};
use crate::common::{RequestId, ServiceError};
use crate::config::Config;
use crate::kernel::metrics::Metrics;
use crate::kernel::tenants::Identity;

/// Caller-supplied option overrides; anything omitted falls back to the
/// configured queue defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubmitOptions {
    pub attempts: Option<u32>,
    pub backoff: Option<Backoff>,
    #[serde(rename = "delay")]
    pub delay_ms: Option<u64>,
    pub priority: Option<i64>,
    pub timeout_ms: Option<u64>,
}

impl SubmitOptions {
    pub fn into_job_options(self, config: &Config) -> JobOptions {
        JobOptions {
            attempts: self.attempts.unwrap_or(config.default_job_attempts).max(1),
            backoff: self.backoff.unwrap_or(Backoff {
                kind: Default::default(),
                delay_ms: config.default_backoff_delay_ms,
            }),
            delay_ms: self.delay_ms.unwrap_or(0),
            priority: self.priority.unwrap_or(0),
            timeout_ms: self.timeout_ms,
        }
    }
}

/// Outcome of a cancel call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// Removed from the waiting or delayed set.
    Removed,
    /// In-flight; the handler's cancellation token was signalled.
    Signalled,
}

#[derive(Debug, Clone)]
struct QueueInfo {
    created_at: DateTime<Utc>,
}

pub struct QueueManager {
    store: JobStore,
    bus: EventBus,
    config: Arc<Config>,
    metrics: Arc<Metrics>,
    queues: DashMap<String, QueueInfo>,
    /// Cancellation tokens for in-flight jobs, shared with the worker
    /// runtime which registers and clears them.
    cancellations: Arc<DashMap<String, CancellationToken>>,
}

impl QueueManager {
    pub fn new(
        store: JobStore,
        bus: EventBus,
        config: Arc<Config>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            store,
            bus,
            config,
            metrics,
            queues: DashMap::new(),
            cancellations: Arc::new(DashMap::new()),
        }
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn store(&self) -> &JobStore {
        &self.store
    }

    pub fn cancellations(&self) -> Arc<DashMap<String, CancellationToken>> {
        self.cancellations.clone()
    }

    /// Re-register queues recorded in the KV store (startup reconciliation).
    pub async fn load_known_queues(&self) -> Result<()> {
        for queue in self.store.known_queues().await? {
            self.ensure_queue(&queue);
        }
        Ok(())
    }

    fn ensure_queue(&self, name: &str) {
        self.queues.entry(name.to_string()).or_insert_with(|| {
            tracing::info!(queue = %name, "queue created");
            QueueInfo {
                created_at: Utc::now(),
            }
        });
    }

    fn validate_queue_name(name: &str) -> Result<(), ServiceError> {
        if name.is_empty() || name.len() > 128 {
            return Err(ServiceError::Validation(
                "queue name must be 1..=128 characters".to_string(),
            ));
        }
        if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(ServiceError::Validation(
                "queue name may only contain alphanumerics, '-' and '_'".to_string(),
            ));
        }
        Ok(())
    }

    // ========================================================================
    // Submission path
    // ========================================================================

    /// Enqueue a job, creating the queue lazily.
    #[allow(clippy::too_many_arguments)]
    pub async fn enqueue(
        &self,
        identity: &Identity,
        queue: &str,
        name: &str,
        data: Value,
        options: SubmitOptions,
        extra_metadata: Map<String, Value>,
        webhooks: Option<HashMap<String, String>>,
        request_id: &RequestId,
    ) -> Result<Job, ServiceError> {
        Self::validate_queue_name(queue)?;
        if !identity.can_access_queue(queue) {
            return Err(ServiceError::QueueAccessDenied(queue.to_string()));
        }
        if data.is_null() {
            return Err(ServiceError::MissingData("job data is required".to_string()));
        }

        self.ensure_queue(queue);

        let options = options.into_job_options(&self.config);
        let delayed = options.delay_ms > 0;
        let mut job = Job::builder()
            .queue_name(queue)
            .name(if name.is_empty() { queue } else { name })
            .data(data)
            .metadata(JobMetadata {
                application_id: identity.application_id.clone(),
                application_name: identity.application_name.clone(),
                submitted_at: Utc::now(),
                request_id: request_id.0.clone(),
                extra: extra_metadata,
            })
            .options(options)
            .build();
        if delayed {
            job.status = JobStatus::Delayed;
        }
        job.webhooks = webhooks;

        self.store
            .push(&job)
            .await
            .map_err(|e| ServiceError::action("enqueue", e))?;

        self.metrics.job_enqueued(queue);
        self.bus.emit(JobEvent::from_job(EventKind::Created, &job));

        tracing::info!(
            job_id = %job.job_id,
            queue = %queue,
            application_id = %identity.application_id,
            delayed,
            "job enqueued"
        );
        Ok(job)
    }

    // ========================================================================
    // Read / cancel path
    // ========================================================================

    pub async fn get_job(
        &self,
        identity: &Identity,
        queue: &str,
        job_id: &str,
    ) -> Result<Job, ServiceError> {
        let job = self
            .store
            .get(job_id)
            .await
            .map_err(|e| ServiceError::action("get_job", e))?
            .filter(|job| job.queue_name == queue)
            .ok_or_else(|| ServiceError::JobNotFound(job_id.to_string()))?;

        if !identity.can_access_job(&job) {
            return Err(ServiceError::Unauthorized(
                "job belongs to another application".to_string(),
            ));
        }
        Ok(job)
    }

    /// Cancel a job. Idempotent for non-terminal jobs; terminal jobs
    /// return a stable validation error.
    pub async fn cancel(
        &self,
        identity: &Identity,
        queue: &str,
        job_id: &str,
    ) -> Result<CancelOutcome, ServiceError> {
        let job = self.get_job(identity, queue, job_id).await?;

        if job.is_terminal() {
            return Err(ServiceError::Validation(
                "job already reached a terminal state".to_string(),
            ));
        }

        if job.status == JobStatus::Active {
            if let Some(token) = self.cancellations.get(job_id) {
                token.cancel();
            }
            tracing::info!(job_id = %job_id, queue = %queue, "cancellation signalled");
            return Ok(CancelOutcome::Signalled);
        }

        self.store
            .remove(queue, job_id)
            .await
            .map_err(|e| ServiceError::action("cancel", e))?;
        tracing::info!(job_id = %job_id, queue = %queue, "job removed");
        Ok(CancelOutcome::Removed)
    }

    // ========================================================================
    // Worker path
    // ========================================================================

    /// Reserve the next eligible job for execution; bumps the attempt
    /// counter and emits `started`.
    pub async fn reserve(&self, queue: &str, worker_token: &str) -> Result<Option<Job>> {
        let Some(mut job) = self
            .store
            .reserve(queue, self.visibility_timeout_ms())
            .await?
        else {
            return Ok(None);
        };

        job.status = JobStatus::Active;
        job.attempts_made += 1;
        job.processed_at = Some(Utc::now());
        self.store.save_doc(&job).await?;

        self.metrics.job_started(queue);
        self.bus.emit(JobEvent::from_job(EventKind::Started, &job));

        tracing::debug!(
            job_id = %job.job_id,
            queue = %queue,
            worker = %worker_token,
            attempt = job.attempts_made,
            "job reserved"
        );
        Ok(Some(job))
    }

    /// Terminal success: persist result, trim retention, emit `completed`.
    pub async fn complete_job(&self, mut job: Job, result: Value) -> Result<Job> {
        job.mark_completed(result);
        self.store.finish(&job).await?;

        self.metrics.job_completed(&job.queue_name);
        self.bus.emit(JobEvent::from_job(EventKind::Completed, &job));

        tracing::info!(job_id = %job.job_id, queue = %job.queue_name, "job completed");
        Ok(job)
    }

    /// Record a failed attempt: re-enqueue delayed per the backoff policy
    /// while retryable attempts remain, otherwise fail terminally.
    pub async fn fail_attempt(&self, mut job: Job, failure: HandlerFailure) -> Result<Job> {
        let retry = failure.kind.should_retry() && job.has_attempts_remaining();

        if retry {
            let delay_ms = job.next_retry_delay_ms();
            let due_ms = Utc::now().timestamp_millis() + delay_ms as i64;
            job.status = JobStatus::Delayed;
            job.failed_reason = Some(failure.message.clone());
            self.store.retry_later(&job, due_ms).await?;

            tracing::warn!(
                job_id = %job.job_id,
                queue = %job.queue_name,
                attempt = job.attempts_made,
                delay_ms,
                error = %failure.message,
                "job attempt failed, retry scheduled"
            );
            return Ok(job);
        }

        let reason = match failure.kind {
            ErrorKind::Cancelled => "cancelled".to_string(),
            _ => failure.message,
        };
        job.mark_failed(reason);
        self.store.finish(&job).await?;

        self.metrics.job_failed(&job.queue_name);
        self.bus.emit(JobEvent::from_job(EventKind::Failed, &job));

        tracing::warn!(
            job_id = %job.job_id,
            queue = %job.queue_name,
            attempts = job.attempts_made,
            reason = %job.failed_reason.as_deref().unwrap_or_default(),
            "job failed terminally"
        );
        Ok(job)
    }

    /// Extend the visibility deadline of an active job.
    pub async fn heartbeat(&self, queue: &str, job_id: &str) -> Result<()> {
        self.store
            .heartbeat(queue, job_id, self.visibility_timeout_ms())
            .await
    }

    /// Promote due delayed jobs for every known queue (housekeeping).
    pub async fn promote_due_jobs(&self) -> Result<()> {
        for entry in self.queues.iter() {
            let queue = entry.key().clone();
            if let Err(e) = self.store.promote_due(&queue).await {
                tracing::warn!(queue = %queue, error = %e, "delayed promotion failed");
            }
        }
        Ok(())
    }

    fn visibility_timeout_ms(&self) -> u64 {
        // Visibility must outlast the per-job timeout so only crashed
        // workers trigger reclamation; heartbeats extend it further.
        self.config.default_job_timeout_ms.saturating_mul(2).max(60_000)
    }

    // ========================================================================
    // Queue control
    // ========================================================================

    pub async fn pause(&self, identity: &Identity, queue: &str) -> Result<(), ServiceError> {
        identity.require_master()?;
        self.ensure_queue(queue);
        self.store
            .pause(queue)
            .await
            .map_err(|e| ServiceError::action("pause", e))?;
        tracing::info!(queue = %queue, "queue paused");
        Ok(())
    }

    pub async fn resume(&self, identity: &Identity, queue: &str) -> Result<(), ServiceError> {
        identity.require_master()?;
        self.store
            .resume(queue)
            .await
            .map_err(|e| ServiceError::action("resume", e))?;
        tracing::info!(queue = %queue, "queue resumed");
        Ok(())
    }

    /// Trim terminal buckets. `bucket = None` cleans both.
    pub async fn clean(
        &self,
        identity: &Identity,
        queue: &str,
        older_than_ms: u64,
        bucket: Option<TerminalBucket>,
    ) -> Result<u64, ServiceError> {
        identity.require_master()?;
        let buckets = match bucket {
            Some(bucket) => vec![bucket],
            None => vec![TerminalBucket::Completed, TerminalBucket::Failed],
        };

        let mut removed = 0;
        for bucket in buckets {
            removed += self
                .store
                .clean(queue, bucket, older_than_ms)
                .await
                .map_err(|e| ServiceError::action("clean", e))?;
        }
        tracing::info!(queue = %queue, removed, "queue cleaned");
        Ok(removed)
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    pub fn queue_exists(&self, queue: &str) -> bool {
        self.queues.contains_key(queue)
    }

    /// Queues visible to the identity.
    pub fn list_queues(&self, identity: &Identity) -> Vec<String> {
        let mut queues: Vec<String> = self
            .queues
            .iter()
            .map(|entry| entry.key().clone())
            .filter(|queue| identity.can_access_queue(queue))
            .collect();
        queues.sort();
        queues
    }

    pub async fn stats(
        &self,
        identity: &Identity,
        queue: &str,
    ) -> Result<QueueStats, ServiceError> {
        if !identity.can_access_queue(queue) {
            return Err(ServiceError::QueueAccessDenied(queue.to_string()));
        }
        if !self.queue_exists(queue) {
            return Err(ServiceError::QueueNotFound(queue.to_string()));
        }
        self.store
            .stats(queue)
            .await
            .map_err(|e| ServiceError::action("stats", e))
    }

    pub async fn all_stats(
        &self,
        identity: &Identity,
    ) -> Result<HashMap<String, QueueStats>, ServiceError> {
        let mut all = HashMap::new();
        for queue in self.list_queues(identity) {
            let stats = self
                .store
                .stats(&queue)
                .await
                .map_err(|e| ServiceError::action("stats", e))?;
            all.insert(queue, stats);
        }
        Ok(all)
    }

    /// Jobs in one status set, oldest first (newest first for terminal
    /// buckets); non-master identities only see their own jobs.
    pub async fn list_jobs(
        &self,
        identity: &Identity,
        queue: &str,
        status: JobStatus,
        limit: usize,
    ) -> Result<Vec<Job>, ServiceError> {
        if !identity.can_access_queue(queue) {
            return Err(ServiceError::QueueAccessDenied(queue.to_string()));
        }
        let ids = self
            .store
            .list_ids(queue, status, limit as isize)
            .await
            .map_err(|e| ServiceError::action("list_jobs", e))?;

        let mut jobs = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(job) = self
                .store
                .get(&id)
                .await
                .map_err(|e| ServiceError::action("list_jobs", e))?
            {
                if identity.can_access_job(&job) {
                    jobs.push(job);
                }
            }
        }
        Ok(jobs)
    }

    pub fn queue_created_at(&self, queue: &str) -> Option<DateTime<Utc>> {
        self.queues.get(queue).map(|info| info.created_at)
    }
}

#[async_trait]
impl ProgressReporter for QueueManager {
    async fn update_progress(&self, job: &Job, progress: Value) -> Result<()> {
        let mut updated = job.clone();
        updated.progress = progress;
        self.store.save_doc(&updated).await?;
        self.bus
            .emit(JobEvent::from_job(EventKind::Progress, &updated));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn submit_options_fall_back_to_config_defaults() {
        let config = crate::config::Config {
            port: 3000,
            redis_host: "localhost".to_string(),
            redis_port: 6379,
            redis_password: None,
            redis_db: 0,
            redis_tls_port: 25061,
            mongodb_uri: String::new(),
            mongodb_database: String::new(),
            master_api_key: "master-key-0123456789abcdef".to_string(),
            auth_enabled: true,
            max_workers_per_queue: 5,
            default_job_attempts: 3,
            default_backoff_delay_ms: 5_000,
            default_job_timeout_ms: 30_000,
            completed_retention_secs: 3_600,
            completed_retention_count: 1_000,
            failed_retention_secs: 86_400,
            failed_retention_count: 5_000,
            scheduler_tick_secs: 60,
            metrics_enabled: false,
            metrics_port: 9090,
            rate_limit_window_secs: 60,
            rate_limit_max: 600,
            log_level: "info".to_string(),
        };

        let options = SubmitOptions::default().into_job_options(&config);
        assert_eq!(options.attempts, 3);
        assert_eq!(options.backoff.delay_ms, 5_000);
        assert_eq!(options.delay_ms, 0);

        let options = SubmitOptions {
            attempts: Some(0),
            ..Default::default()
        }
        .into_job_options(&config);
        assert_eq!(options.attempts, 1, "attempts floor at one");
    }

    #[test]
    fn queue_name_validation() {
        assert!(QueueManager::validate_queue_name("email").is_ok());
        assert!(QueueManager::validate_queue_name("email-eu_1").is_ok());
        assert!(QueueManager::validate_queue_name("").is_err());
        assert!(QueueManager::validate_queue_name("bad queue").is_err());
        assert!(QueueManager::validate_queue_name("bad/queue").is_err());
    }
}
