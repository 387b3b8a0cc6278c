//! # dog-jobs: Priority Job Lifecycle and Dispatch
//!
//! **Bounded retries, dead-letter escalation and live metrics over three priority classes**
//!
//! Jobs are submitted with a priority class (`critical`, `high` or `normal`) and a
//! job type. Each class has its own FIFO channel; a dispatcher claims work in
//! strict priority order under per-class concurrency and rate limits, runs the
//! executor registered for the job type, and either completes the job or hands
//! the failure to the retry controller.
//!
//! ## Guarantees
//!
//! - **At-least-once execution**: claims carry a visibility timeout; an entry whose
//!   worker disappears becomes claimable again. Executors must be safe to re-run.
//! - **Bounded attempts**: `attempts` never exceeds `max_attempts`. Exhausted jobs
//!   are written to the dead-letter store and marked `failed`.
//! - **Terminal is final**: a `completed` or `failed` job never changes again and
//!   holds no queue entry.
//! - **Stale writers lose**: every record update is checked against the attempt
//!   number the writer observed.
//! - **Observation never blocks dispatch**: metrics subscribers that fall behind are
//!   dropped on their own.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use dog_jobs::prelude::*;
//! use serde_json::json;
//!
//! # async fn run() -> QueueResult<()> {
//! let mut registry = ExecutorRegistry::builder();
//! register_builtins(&mut registry, BuiltinLatency::default())?;
//!
//! let engine = JobEngine::in_memory(EngineConfig::from_env()?, registry.build())?;
//! let workers = engine.start();
//!
//! let job_id = engine
//!     .submit(SubmitJob::new(
//!         "welcome mail",
//!         "high",
//!         "email-processing",
//!         json!({ "recipients": ["ada@example.com"] }),
//!     ))
//!     .await?;
//!
//! let view = engine.status(&job_id).await?;
//! println!("{} is {}", view.job_id, view.status);
//!
//! workers.shutdown().await?;
//! # Ok(())
//! # }
//! ```

use std::pin::Pin;

use futures::Stream;

pub mod config;
pub mod engine;
pub mod error;
pub mod execution;
pub mod job;
pub mod observability;
pub mod queue;
pub mod store;
pub mod types;

pub use config::{EngineConfig, PerClass};
pub use engine::{JobEngine, DEFAULT_LIST_LIMIT};
pub use error::{ErrorClass, JobError, QueueError, QueueResult};
pub use execution::{BackoffSchedule, WorkerHandle};
pub use job::{Executor, ExecutorRegistry, Job};
pub use observability::{DashboardSnapshot, MetricsAggregator, QueueSnapshot, SystemMetrics};
pub use store::JobStore;
pub use types::{
    ClaimToken, DeadLetterRecord, HistoryEntry, JobEvent, JobId, JobPriority, JobRecord,
    JobStatus, JobSummary, JobView, StatusUpdate, SubmitJob,
};

#[cfg(feature = "memory")]
pub use store::MemoryJobStore;

/// Boxed stream returned by the subscription APIs
pub type BoxStream<T> = Pin<Box<dyn Stream<Item = T> + Send + 'static>>;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        EngineConfig, Executor, ExecutorRegistry, Job, JobEngine, JobError, JobId, JobPriority,
        JobStatus, JobStore, QueueError, QueueResult, SubmitJob,
    };
    pub use crate::job::{register_builtins, BuiltinLatency};

    #[cfg(feature = "memory")]
    pub use crate::MemoryJobStore;

    #[cfg(feature = "tracing-basic")]
    pub use crate::observability::{init_tracing, LogFormat};
}
