//! Memory store with injectable faults, for engine and dispatcher tests.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use super::{JobStore, MemoryJobStore};
use crate::observability::metrics::{JobStats, SystemMetrics};
use crate::{
    DeadLetterRecord, HistoryEntry, JobId, JobPriority, JobRecord, JobStatus, QueueError,
    QueueResult, StatusUpdate,
};

#[derive(Default)]
pub(crate) struct FaultyStore {
    pub inner: MemoryJobStore,
    /// Records served by `get` instead of the current one
    stale_reads: Mutex<HashMap<JobId, JobRecord>>,
    dead_letters_down: bool,
}

impl FaultyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every dead-letter write fails with a store error
    pub fn without_dead_letters() -> Self {
        Self {
            dead_letters_down: true,
            ..Self::default()
        }
    }

    /// Serve `record` from `get` while writes go to the current record
    pub fn serve_stale(&self, record: JobRecord) {
        self.stale_reads.lock().insert(record.job_id.clone(), record);
    }
}

#[async_trait]
impl JobStore for FaultyStore {
    async fn create(&self, record: JobRecord) -> QueueResult<JobRecord> {
        self.inner.create(record).await
    }

    async fn get(&self, job_id: &JobId) -> QueueResult<JobRecord> {
        let stale = self.stale_reads.lock().get(job_id).cloned();
        match stale {
            Some(record) => Ok(record),
            None => self.inner.get(job_id).await,
        }
    }

    async fn list_by_status(&self, status: JobStatus, limit: usize) -> QueueResult<Vec<JobRecord>> {
        self.inner.list_by_status(status, limit).await
    }

    async fn list_by_priority(&self, priority: JobPriority, limit: usize) -> QueueResult<Vec<JobRecord>> {
        self.inner.list_by_priority(priority, limit).await
    }

    async fn update_status(&self, job_id: &JobId, update: StatusUpdate) -> QueueResult<JobRecord> {
        self.inner.update_status(job_id, update).await
    }

    async fn append_history(&self, entry: HistoryEntry) -> QueueResult<()> {
        self.inner.append_history(entry).await
    }

    async fn history(&self, job_id: &JobId) -> QueueResult<Vec<HistoryEntry>> {
        self.inner.history(job_id).await
    }

    async fn write_dead_letter(&self, record: DeadLetterRecord) -> QueueResult<()> {
        if self.dead_letters_down {
            return Err(QueueError::Store("dead-letter table unavailable".to_string()));
        }
        self.inner.write_dead_letter(record).await
    }

    async fn dead_letters(&self, limit: usize) -> QueueResult<Vec<DeadLetterRecord>> {
        self.inner.dead_letters(limit).await
    }

    async fn aggregate_stats(&self, since: DateTime<Utc>) -> QueueResult<SystemMetrics> {
        self.inner.aggregate_stats(since).await
    }

    async fn count_by_status(&self) -> QueueResult<JobStats> {
        self.inner.count_by_status().await
    }
}
