//! Worker runtime: executes jobs from registered queues.
//!
//! For every registered queue the runtime spawns `concurrency` worker
//! loops, each doing `reserve → run handler → complete/fail`. A heartbeat
//! task extends the visibility deadline of long-running jobs; a
//! housekeeping task promotes due delayed jobs for queues nobody is
//! actively polling.
//!
//! ```text
//! WorkerRuntime
//!     │
//!     ├─► reserve (QueueManager → KV, atomic)
//!     ├─► handler.run(job, ctx)      ── progress / cancellation via ctx
//!     └─► complete_job / fail_attempt (retries handled by the manager)
//! ```

use anyhow::Result;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::job::Job;
use super::manager::QueueManager;
use super::registry::{ErrorKind, HandlerFailure, HandlerRegistry, JobContext, JobHandler};

/// Worker runtime tuning.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Sleep between polls when a queue is empty.
    pub poll_interval: Duration,
    /// Visibility-extension cadence for running jobs.
    pub heartbeat_interval: Duration,
    /// Grace given to cancelled or draining jobs before they are failed.
    pub drain_grace: Duration,
    /// Fallback per-job timeout when the job carries none.
    pub default_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            heartbeat_interval: Duration::from_secs(15),
            drain_grace: Duration::from_secs(10),
            default_timeout: Duration::from_secs(30),
        }
    }
}

pub struct WorkerRuntime {
    manager: Arc<QueueManager>,
    registry: Arc<HandlerRegistry>,
    config: WorkerConfig,
}

impl WorkerRuntime {
    pub fn new(manager: Arc<QueueManager>, registry: Arc<HandlerRegistry>) -> Self {
        Self {
            manager,
            registry,
            config: WorkerConfig::default(),
        }
    }

    pub fn with_config(
        manager: Arc<QueueManager>,
        registry: Arc<HandlerRegistry>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            manager,
            registry,
            config,
        }
    }

    /// Run worker groups for every registered queue until shutdown.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) -> Result<()> {
        let mut handles = Vec::new();

        for (queue, concurrency) in self.registry.registered_queues() {
            info!(queue = %queue, concurrency, "starting worker group");
            for index in 0..concurrency {
                let runtime = self.clone();
                let queue = queue.clone();
                let shutdown = shutdown.clone();
                let worker_token = format!("worker-{}-{}-{}", queue, index, Uuid::new_v4());
                handles.push(tokio::spawn(async move {
                    runtime.worker_loop(&queue, &worker_token, shutdown).await;
                }));
            }
        }

        // Housekeeping: promote due delayed jobs across all known queues,
        // so delays surface even on queues with no registered handler.
        {
            let runtime = self.clone();
            let shutdown = shutdown.clone();
            handles.push(tokio::spawn(async move {
                let mut interval = tokio::time::interval(Duration::from_secs(5));
                loop {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = interval.tick() => {
                            if let Err(e) = runtime.manager.promote_due_jobs().await {
                                warn!(error = %e, "delayed-job promotion failed");
                            }
                        }
                    }
                }
            }));
        }

        futures::future::join_all(handles).await;
        info!("worker runtime stopped");
        Ok(())
    }

    async fn worker_loop(&self, queue: &str, worker_token: &str, shutdown: CancellationToken) {
        let Some(handler) = self.registry.handler_for(queue) else {
            error!(queue = %queue, "no handler registered; worker exiting");
            return;
        };

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            let job = match self.manager.reserve(queue, worker_token).await {
                Ok(job) => job,
                Err(e) => {
                    error!(queue = %queue, error = %e, "reserve failed");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    continue;
                }
            };

            let Some(job) = job else {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(self.config.poll_interval) => {}
                }
                continue;
            };

            self.process_job(job, handler.clone(), worker_token, &shutdown)
                .await;
        }

        debug!(queue = %queue, worker = %worker_token, "worker loop stopped");
    }

    async fn process_job(
        &self,
        job: Job,
        handler: Arc<dyn JobHandler>,
        worker_token: &str,
        shutdown: &CancellationToken,
    ) {
        let job_id = job.job_id.clone();
        let queue = job.queue_name.clone();

        let cancellations = self.manager.cancellations();
        let job_token = shutdown.child_token();
        cancellations.insert(job_id.clone(), job_token.clone());

        // Heartbeat task keeps the visibility deadline ahead of execution.
        let heartbeat_handle = {
            let manager = self.manager.clone();
            let heartbeat_token = job_token.clone();
            let interval = self.config.heartbeat_interval;
            let queue = queue.clone();
            let job_id = job_id.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.tick().await; // skip the immediate tick
                loop {
                    tokio::select! {
                        _ = heartbeat_token.cancelled() => break,
                        _ = ticker.tick() => {
                            if let Err(e) = manager.heartbeat(&queue, &job_id).await {
                                warn!(job_id = %job_id, error = %e, "heartbeat failed");
                            }
                        }
                    }
                }
            })
        };

        let result = self
            .execute(&job, handler, job_token.clone(), worker_token)
            .await;

        job_token.cancel();
        let _ = heartbeat_handle.await;
        cancellations.remove(&job_id);

        match result {
            Ok(result) => {
                if let Err(e) = self.manager.complete_job(job, result).await {
                    error!(job_id = %job_id, error = %e, "failed to record completion");
                }
            }
            Err(mut failure) => {
                // A cancel triggered by shutdown is an interruption, not a
                // user cancellation: keep it retryable.
                if failure.kind == ErrorKind::Cancelled && shutdown.is_cancelled() {
                    failure = HandlerFailure {
                        kind: ErrorKind::Shutdown,
                        message: "interrupted by shutdown".to_string(),
                    };
                }
                if let Err(e) = self.manager.fail_attempt(job, failure).await {
                    error!(job_id = %job_id, error = %e, "failed to record failure");
                }
            }
        }
    }

    /// Run the handler under its timeout with cooperative cancellation.
    async fn execute(
        &self,
        job: &Job,
        handler: Arc<dyn JobHandler>,
        token: CancellationToken,
        worker_token: &str,
    ) -> Result<Value, HandlerFailure> {
        let timeout = job
            .options
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(self.config.default_timeout);

        let ctx = JobContext::new(
            token.clone(),
            worker_token.to_string(),
            self.manager.clone(),
        );

        let grace = self.config.drain_grace;
        tokio::select! {
            result = handler.run(job, &ctx) => result,
            // After a cancellation signal the handler keeps the grace
            // window to observe the token and return on its own.
            _ = async { token.cancelled().await; tokio::time::sleep(grace).await } => {
                Err(HandlerFailure::cancelled())
            }
            _ = tokio::time::sleep(timeout) => {
                Err(HandlerFailure::retryable(format!(
                    "job timed out after {}ms",
                    timeout.as_millis()
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_sane() {
        let config = WorkerConfig::default();
        assert!(config.poll_interval < config.heartbeat_interval);
        assert_eq!(config.default_timeout, Duration::from_secs(30));
    }
}
