use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::debug;

use super::JobStore;
use crate::observability::metrics::{JobStats, SystemMetrics};
use crate::{
    DeadLetterRecord, HistoryEntry, JobId, JobPriority, JobRecord, JobStatus, QueueError,
    QueueResult, StatusUpdate,
};

#[derive(Debug, Default)]
struct StoreState {
    jobs: HashMap<JobId, JobRecord>,
    /// Insertion order, for newest-first listings
    order: Vec<JobId>,
    history: Vec<HistoryEntry>,
    dead_letters: Vec<DeadLetterRecord>,
}

/// In-process job store
#[derive(Debug, Clone, Default)]
pub struct MemoryJobStore {
    state: Arc<RwLock<StoreState>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn list_where<F>(&self, limit: usize, predicate: F) -> Vec<JobRecord>
    where
        F: Fn(&JobRecord) -> bool,
    {
        let state = self.state.read();
        state
            .order
            .iter()
            .rev()
            .filter_map(|job_id| state.jobs.get(job_id))
            .filter(|record| predicate(record))
            .take(limit)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(&self, record: JobRecord) -> QueueResult<JobRecord> {
        let mut state = self.state.write();
        if state.jobs.contains_key(&record.job_id) {
            return Err(QueueError::DuplicateJob(record.job_id.to_string()));
        }
        state.order.push(record.job_id.clone());
        state.jobs.insert(record.job_id.clone(), record.clone());
        Ok(record)
    }

    async fn get(&self, job_id: &JobId) -> QueueResult<JobRecord> {
        self.state
            .read()
            .jobs
            .get(job_id)
            .cloned()
            .ok_or_else(|| QueueError::JobNotFound(job_id.to_string()))
    }

    async fn list_by_status(&self, status: JobStatus, limit: usize) -> QueueResult<Vec<JobRecord>> {
        Ok(self.list_where(limit, |record| record.status == status))
    }

    async fn list_by_priority(&self, priority: JobPriority, limit: usize) -> QueueResult<Vec<JobRecord>> {
        Ok(self.list_where(limit, |record| record.priority == priority))
    }

    async fn update_status(&self, job_id: &JobId, update: StatusUpdate) -> QueueResult<JobRecord> {
        let mut state = self.state.write();
        let record = state
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| QueueError::JobNotFound(job_id.to_string()))?;

        // apply on a copy so a rejected update leaves the record untouched
        let mut next = record.clone();
        next.apply(&update)?;
        *record = next.clone();

        debug!(%job_id, status = %next.status, attempts = next.attempts, "job record updated");
        Ok(next)
    }

    async fn append_history(&self, entry: HistoryEntry) -> QueueResult<()> {
        self.state.write().history.push(entry);
        Ok(())
    }

    async fn history(&self, job_id: &JobId) -> QueueResult<Vec<HistoryEntry>> {
        Ok(self
            .state
            .read()
            .history
            .iter()
            .filter(|entry| &entry.job_id == job_id)
            .cloned()
            .collect())
    }

    async fn write_dead_letter(&self, record: DeadLetterRecord) -> QueueResult<()> {
        let mut state = self.state.write();
        if state.dead_letters.iter().any(|dead| dead.job_id == record.job_id) {
            return Err(QueueError::DuplicateJob(record.job_id.to_string()));
        }
        state.dead_letters.push(record);
        Ok(())
    }

    async fn dead_letters(&self, limit: usize) -> QueueResult<Vec<DeadLetterRecord>> {
        Ok(self
            .state
            .read()
            .dead_letters
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect())
    }

    async fn aggregate_stats(&self, since: DateTime<Utc>) -> QueueResult<SystemMetrics> {
        let state = self.state.read();
        Ok(SystemMetrics::from_history(&state.history, since, Utc::now()))
    }

    async fn count_by_status(&self) -> QueueResult<JobStats> {
        let state = self.state.read();
        let mut stats = JobStats::default();
        for record in state.jobs.values() {
            stats.record(record.status);
        }
        Ok(stats)
    }
}
