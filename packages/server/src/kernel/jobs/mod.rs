//! Job infrastructure: the queue core.
//!
//! - [`Job`] - the job model and its lifecycle
//! - [`JobStore`] - atomic KV primitives (waiting/delayed/active/terminal)
//! - [`QueueManager`] - the public queue contract (enqueue, cancel, control)
//! - [`EventBus`] - in-process lifecycle event fan-out
//! - [`HandlerRegistry`] / [`WorkerRuntime`] - handler execution
//! - [`TrackerService`] - status surface for out-of-band workers
//!
//! ```text
//! API ─► QueueManager.enqueue ─► JobStore (KV) ─► EventBus (created)
//!
//! WorkerRuntime
//!     ├─► QueueManager.reserve (atomic KV reserve, emits started)
//!     ├─► JobHandler.run(job, ctx)
//!     └─► complete_job / fail_attempt (retry or terminal, emits event)
//! ```
//!
//! Handler business logic lives in `kernel::handlers`; this module only
//! provides the infrastructure.

pub mod events;
pub mod job;
pub mod manager;
pub mod registry;
pub mod runner;
pub mod store;
pub mod tracker;

pub use events::{EventBus, EventKind, JobEvent};
pub use job::{Backoff, BackoffKind, Job, JobMetadata, JobOptions, JobStatus};
pub use manager::{CancelOutcome, QueueManager, SubmitOptions};
pub use registry::{
    ErrorKind, HandlerFailure, HandlerRegistry, JobContext, JobHandler, ProgressReporter,
};
pub use runner::{WorkerConfig, WorkerRuntime};
pub use store::{JobStore, QueueStats, RetentionPolicy, TerminalBucket};
pub use tracker::{TrackerQuery, TrackerService, TrackerUpdate};
