//! Durable job store boundary.
//!
//! The engine owns no persisted state itself: job records, the history trail
//! and dead-letter records all live behind [`JobStore`].

#[cfg(feature = "memory")]
pub mod memory;

#[cfg(feature = "memory")]
pub use memory::MemoryJobStore;

#[cfg(all(test, feature = "memory"))]
pub(crate) mod testing;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::observability::metrics::{JobStats, SystemMetrics};
use crate::{
    DeadLetterRecord, HistoryEntry, JobId, JobPriority, JobRecord, JobStatus, QueueResult,
    StatusUpdate,
};

/// Persistence interface consumed by the engine
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persist a new record. Fails with `DuplicateJob` if the id exists.
    async fn create(&self, record: JobRecord) -> QueueResult<JobRecord>;

    /// Fails with `JobNotFound` for unknown ids
    async fn get(&self, job_id: &JobId) -> QueueResult<JobRecord>;

    /// Newest first
    async fn list_by_status(&self, status: JobStatus, limit: usize) -> QueueResult<Vec<JobRecord>>;

    /// Newest first
    async fn list_by_priority(&self, priority: JobPriority, limit: usize) -> QueueResult<Vec<JobRecord>>;

    /// Apply a guarded update atomically and return the new record.
    /// See [`JobRecord::apply`] for the rules.
    async fn update_status(&self, job_id: &JobId, update: StatusUpdate) -> QueueResult<JobRecord>;

    async fn append_history(&self, entry: HistoryEntry) -> QueueResult<()>;

    /// History of one job, oldest first
    async fn history(&self, job_id: &JobId) -> QueueResult<Vec<HistoryEntry>>;

    /// At most one record per job. Fails with `DuplicateJob` for a second one.
    async fn write_dead_letter(&self, record: DeadLetterRecord) -> QueueResult<()>;

    /// Newest first
    async fn dead_letters(&self, limit: usize) -> QueueResult<Vec<DeadLetterRecord>>;

    /// Throughput, failure rate and latency over history recorded since `since`
    async fn aggregate_stats(&self, since: DateTime<Utc>) -> QueueResult<SystemMetrics>;

    async fn count_by_status(&self) -> QueueResult<JobStats>;
}
