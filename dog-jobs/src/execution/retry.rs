use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::queue::{ClaimedEntry, PriorityQueueSet};
use crate::store::JobStore;
use crate::{
    DeadLetterRecord, HistoryEntry, JobError, JobEvent, JobRecord, QueueError, StatusUpdate,
};

/// Delays applied between attempts. Attempt `n` (1-based) waits
/// `delays[n - 1]`; attempts past the end reuse the last delay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffSchedule {
    delays: Vec<Duration>,
}

impl Default for BackoffSchedule {
    fn default() -> Self {
        Self::from_millis(&[1_000, 5_000, 30_000])
    }
}

impl BackoffSchedule {
    pub fn new(delays: Vec<Duration>) -> Self {
        Self { delays }
    }

    pub fn from_millis(delays: &[u64]) -> Self {
        Self::new(delays.iter().copied().map(Duration::from_millis).collect())
    }

    pub fn delays(&self) -> &[Duration] {
        &self.delays
    }

    /// Delay after the given number of attempts made
    pub fn delay_for(&self, attempts_made: u32) -> Duration {
        if self.delays.is_empty() {
            return Duration::ZERO;
        }
        let index = (attempts_made.max(1) as usize - 1).min(self.delays.len() - 1);
        self.delays[index]
    }
}

impl FromStr for BackoffSchedule {
    type Err = QueueError;

    /// Comma separated milliseconds, e.g. `1000,5000,30000`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let millis = s
            .split(',')
            .map(|part| part.trim().parse::<u64>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| QueueError::InvalidConfig(format!("backoff schedule '{}': {}", s, e)))?;
        Ok(Self::from_millis(&millis))
    }
}

/// What to do after a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Re-enqueue onto the original channel after `delay`
    Retry { delay: Duration },
    /// Write a dead-letter record and fail the job
    Exhaust,
}

impl BackoffSchedule {
    pub fn decide(&self, attempts: u32, max_attempts: u32, error: &JobError) -> RetryDecision {
        if !error.is_retryable() || attempts >= max_attempts {
            RetryDecision::Exhaust
        } else {
            RetryDecision::Retry {
                delay: self.delay_for(attempts),
            }
        }
    }
}

/// Turns failed attempts into `retrying` or `failed` transitions
#[derive(Clone)]
pub struct RetryController {
    store: Arc<dyn JobStore>,
    queues: Arc<PriorityQueueSet>,
    events: broadcast::Sender<JobEvent>,
    backoff: BackoffSchedule,
}

impl RetryController {
    pub fn new(
        store: Arc<dyn JobStore>,
        queues: Arc<PriorityQueueSet>,
        events: broadcast::Sender<JobEvent>,
        backoff: BackoffSchedule,
    ) -> Self {
        Self {
            store,
            queues,
            events,
            backoff,
        }
    }

    /// Handle a failed attempt of `record`, which is the record as written
    /// when the attempt was claimed
    pub async fn handle_failure(
        &self,
        record: &JobRecord,
        claim: &ClaimedEntry,
        error: JobError,
        duration_ms: u64,
    ) {
        match self.backoff.decide(record.attempts, record.max_attempts, &error) {
            RetryDecision::Retry { delay } => {
                self.schedule_retry(record, claim, error.message(), delay, duration_ms)
                    .await
            }
            RetryDecision::Exhaust => {
                self.escalate(record, claim, error.message(), Some(duration_ms))
                    .await
            }
        }
    }

    async fn schedule_retry(
        &self,
        record: &JobRecord,
        claim: &ClaimedEntry,
        reason: &str,
        delay: Duration,
        duration_ms: u64,
    ) {
        let updated = match self
            .store
            .update_status(&record.job_id, StatusUpdate::retrying(record.attempts, reason))
            .await
        {
            Ok(updated) => updated,
            Err(e) => {
                warn!(job_id = %record.job_id, error = %e, "discarding retry of superseded attempt");
                self.queues.settle_rejected(claim, &e);
                return;
            }
        };
        self.append_history(HistoryEntry::from_record(&updated).with_duration_ms(duration_ms))
            .await;

        if let Err(e) = self
            .queues
            .retry(claim.priority, &claim.job_id, &claim.token, delay)
        {
            warn!(job_id = %claim.job_id, error = %e, "claim lost before retry, entry already reclaimed");
        }

        warn!(
            job_id = %record.job_id,
            attempt = updated.attempts,
            max_attempts = updated.max_attempts,
            delay_ms = delay.as_millis() as u64,
            error = reason,
            "job failed, will retry"
        );
        let _ = self.events.send(JobEvent::Retrying {
            job_id: record.job_id.clone(),
            attempt: updated.attempts,
            delay_ms: delay.as_millis() as u64,
            error: reason.to_string(),
            at: Utc::now(),
        });
    }

    /// Mark the job failed, dead-letter it and drop its queue entry.
    ///
    /// The failed transition is guarded by the attempt the caller observed,
    /// so only the attempt that actually terminates the job writes a
    /// dead-letter record. That write is best effort: if it fails the job
    /// stays failed and the failure is logged.
    pub async fn escalate(
        &self,
        record: &JobRecord,
        claim: &ClaimedEntry,
        reason: &str,
        duration_ms: Option<u64>,
    ) {
        let updated = match self
            .store
            .update_status(&record.job_id, StatusUpdate::failed(record.attempts, reason))
            .await
        {
            Ok(updated) => updated,
            Err(e) => {
                warn!(job_id = %record.job_id, error = %e, "discarding escalation of superseded attempt");
                self.queues.settle_rejected(claim, &e);
                return;
            }
        };

        match self
            .store
            .write_dead_letter(DeadLetterRecord::new(&updated, reason))
            .await
        {
            Ok(()) => {
                info!(job_id = %record.job_id, reason, "job moved to dead-letter store");
                let _ = self.events.send(JobEvent::DeadLettered {
                    job_id: record.job_id.clone(),
                    reason: reason.to_string(),
                    at: Utc::now(),
                });
            }
            Err(e) => {
                error!(
                    job_id = %record.job_id,
                    attempts = updated.attempts,
                    error = %e,
                    "dead-letter write failed, job stays failed"
                );
            }
        }

        let mut entry = HistoryEntry::from_record(&updated);
        if let Some(duration_ms) = duration_ms {
            entry = entry.with_duration_ms(duration_ms);
        }
        self.append_history(entry).await;

        if let Err(e) = self
            .queues
            .discard(claim.priority, &claim.job_id, &claim.token)
        {
            warn!(job_id = %claim.job_id, error = %e, "claim lost before discard");
        }

        error!(
            job_id = %record.job_id,
            attempts = updated.attempts,
            error = reason,
            "job failed permanently"
        );
        let _ = self.events.send(JobEvent::Failed {
            job_id: record.job_id.clone(),
            attempt: updated.attempts,
            error: reason.to_string(),
            at: Utc::now(),
        });
    }

    async fn append_history(&self, entry: HistoryEntry) {
        let job_id = entry.job_id.clone();
        if let Err(e) = self.store.append_history(entry).await {
            warn!(%job_id, error = %e, "failed to append job history");
        }
    }
}
