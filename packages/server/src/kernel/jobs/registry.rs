//! Handler registration for queue workers.
//!
//! Each queue binds at most one handler; the worker runtime reads the
//! registration to know how many concurrent workers to run. Handlers
//! receive the job and a [`JobContext`] so they can report progress and
//! observe cancellation, and return either a JSON result or a classified
//! failure that drives the retry decision.

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use super::job::Job;

/// Whether a failure should consume a retry or end the job immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorKind {
    /// Transient error - retried while attempts remain.
    #[default]
    Retryable,
    /// Permanent error - fails the job immediately.
    NonRetryable,
    /// Job was cancelled by the API.
    Cancelled,
    /// Interrupted by graceful shutdown - retried.
    Shutdown,
}

impl ErrorKind {
    pub fn should_retry(&self) -> bool {
        matches!(self, ErrorKind::Retryable | ErrorKind::Shutdown)
    }
}

/// A classified handler failure.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct HandlerFailure {
    pub kind: ErrorKind,
    pub message: String,
}

impl HandlerFailure {
    pub fn retryable(err: impl std::fmt::Display) -> Self {
        Self {
            kind: ErrorKind::Retryable,
            message: err.to_string(),
        }
    }

    pub fn non_retryable(err: impl std::fmt::Display) -> Self {
        Self {
            kind: ErrorKind::NonRetryable,
            message: err.to_string(),
        }
    }

    pub fn cancelled() -> Self {
        Self {
            kind: ErrorKind::Cancelled,
            message: "job cancelled".to_string(),
        }
    }
}

/// Progress sink handed to handlers through the context.
#[async_trait]
pub trait ProgressReporter: Send + Sync {
    async fn update_progress(&self, job: &Job, progress: Value) -> anyhow::Result<()>;
}

/// Execution context for one job attempt.
///
/// Every await inside a handler is a suspension point; handlers should
/// check `is_cancelled` around long stretches of work.
pub struct JobContext {
    pub token: CancellationToken,
    pub worker_token: String,
    progress: Arc<dyn ProgressReporter>,
}

impl JobContext {
    pub fn new(
        token: CancellationToken,
        worker_token: String,
        progress: Arc<dyn ProgressReporter>,
    ) -> Self {
        Self {
            token,
            worker_token,
            progress,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Persist and broadcast a progress update (0..100 or arbitrary JSON).
    pub async fn update_progress(&self, job: &Job, progress: Value) -> anyhow::Result<()> {
        self.progress.update_progress(job, progress).await
    }
}

/// The handler capability: run a job, report a JSON result.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Handler family name (e.g. `webhook`).
    fn name(&self) -> &'static str;

    async fn run(&self, job: &Job, ctx: &JobContext) -> Result<Value, HandlerFailure>;
}

struct Registration {
    handler: Arc<dyn JobHandler>,
    concurrency: usize,
}

/// Maps queue names to their handler and worker concurrency.
pub struct HandlerRegistry {
    registrations: DashMap<String, Registration>,
    default_concurrency: usize,
}

impl HandlerRegistry {
    pub fn new(default_concurrency: usize) -> Self {
        Self {
            registrations: DashMap::new(),
            default_concurrency: default_concurrency.max(1),
        }
    }

    /// Bind a handler to a queue. At most one handler per queue; a second
    /// registration is rejected.
    pub fn register(
        &self,
        queue: impl Into<String>,
        concurrency: usize,
        handler: Arc<dyn JobHandler>,
    ) -> anyhow::Result<()> {
        let queue = queue.into();
        if self.registrations.contains_key(&queue) {
            anyhow::bail!("queue '{}' already has a handler", queue);
        }
        let concurrency = if concurrency == 0 {
            self.default_concurrency
        } else {
            concurrency
        };
        tracing::info!(queue = %queue, handler = handler.name(), concurrency, "handler registered");
        self.registrations.insert(
            queue,
            Registration {
                handler,
                concurrency,
            },
        );
        Ok(())
    }

    pub fn handler_for(&self, queue: &str) -> Option<Arc<dyn JobHandler>> {
        self.registrations.get(queue).map(|r| r.handler.clone())
    }

    pub fn concurrency_for(&self, queue: &str) -> Option<usize> {
        self.registrations.get(queue).map(|r| r.concurrency)
    }

    pub fn is_registered(&self, queue: &str) -> bool {
        self.registrations.contains_key(queue)
    }

    /// Registered queue names with their concurrency, for the runtime to
    /// spawn worker groups.
    pub fn registered_queues(&self) -> Vec<(String, usize)> {
        self.registrations
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().concurrency))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct NoopHandler;

    #[async_trait]
    impl JobHandler for NoopHandler {
        fn name(&self) -> &'static str {
            "noop"
        }

        async fn run(&self, _job: &Job, _ctx: &JobContext) -> Result<Value, HandlerFailure> {
            Ok(json!({"success": true}))
        }
    }

    #[test]
    fn register_and_lookup() {
        let registry = HandlerRegistry::new(5);
        registry
            .register("email", 3, Arc::new(NoopHandler))
            .unwrap();

        assert!(registry.is_registered("email"));
        assert!(!registry.is_registered("webhook"));
        assert_eq!(registry.concurrency_for("email"), Some(3));
        assert_eq!(registry.handler_for("email").unwrap().name(), "noop");
    }

    #[test]
    fn second_registration_for_queue_is_rejected() {
        let registry = HandlerRegistry::new(5);
        registry.register("email", 1, Arc::new(NoopHandler)).unwrap();
        assert!(registry.register("email", 1, Arc::new(NoopHandler)).is_err());
    }

    #[test]
    fn zero_concurrency_falls_back_to_default() {
        let registry = HandlerRegistry::new(5);
        registry.register("email", 0, Arc::new(NoopHandler)).unwrap();
        assert_eq!(registry.concurrency_for("email"), Some(5));
    }

    #[test]
    fn retryable_kinds_should_retry() {
        assert!(ErrorKind::Retryable.should_retry());
        assert!(ErrorKind::Shutdown.should_retry());
        assert!(!ErrorKind::NonRetryable.should_retry());
        assert!(!ErrorKind::Cancelled.should_retry());
    }

    #[test]
    fn failure_constructors_classify() {
        assert_eq!(
            HandlerFailure::retryable("connection reset").kind,
            ErrorKind::Retryable
        );
        assert_eq!(
            HandlerFailure::non_retryable("bad payload").kind,
            ErrorKind::NonRetryable
        );
        assert_eq!(HandlerFailure::cancelled().kind, ErrorKind::Cancelled);
    }
}
