//! Priority queue set: one FIFO [`Channel`] per priority class.
//!
//! Channels only hold transient visibility state. Deleting an entry never
//! touches the job record it points to.

pub mod channel;
pub mod reaper;

pub use channel::{Channel, ClaimedEntry, QueueEntry};
pub use reaper::VisibilityReaper;

use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, error};

use crate::config::PerClass;
use crate::error::ErrorClass;
use crate::observability::metrics::QueueSnapshot;
use crate::{ClaimToken, JobId, JobPriority, QueueError, QueueResult};

pub struct PriorityQueueSet {
    channels: [Channel; 3],
    visibility_timeout: Duration,
    /// Signalled whenever claimable work may have appeared
    work_available: Notify,
}

impl PriorityQueueSet {
    pub fn new(visibility_timeout: Duration) -> Self {
        Self {
            channels: [
                Channel::new(JobPriority::Critical),
                Channel::new(JobPriority::High),
                Channel::new(JobPriority::Normal),
            ],
            visibility_timeout,
            work_available: Notify::new(),
        }
    }

    pub fn channel(&self, priority: JobPriority) -> &Channel {
        &self.channels[priority.index()]
    }

    /// Append an entry to the channel of its class
    pub fn enqueue(&self, priority: JobPriority, entry: QueueEntry) -> QueueResult<()> {
        self.channel(priority).enqueue(entry)?;
        self.work_available.notify_one();
        Ok(())
    }

    /// Claim the oldest ready entry of one class. Only the dispatcher claims.
    pub(crate) fn claim(&self, priority: JobPriority) -> Option<ClaimedEntry> {
        self.channel(priority).claim(self.visibility_timeout)
    }

    pub fn ack(&self, priority: JobPriority, job_id: &JobId, token: &ClaimToken) -> QueueResult<()> {
        self.channel(priority).ack(job_id, token)
    }

    /// Return an entry to its original channel after `delay`
    pub fn retry(
        &self,
        priority: JobPriority,
        job_id: &JobId,
        token: &ClaimToken,
        delay: Duration,
    ) -> QueueResult<()> {
        self.channel(priority).retry(job_id, token, delay)?;
        // the dispatcher re-reads the next release time
        self.work_available.notify_one();
        Ok(())
    }

    pub fn discard(&self, priority: JobPriority, job_id: &JobId, token: &ClaimToken) -> QueueResult<()> {
        self.channel(priority).discard(job_id, token)
    }

    pub fn drop_claim(&self, priority: JobPriority, job_id: &JobId, token: &ClaimToken) -> QueueResult<()> {
        self.channel(priority).drop_claim(job_id, token)
    }

    /// Put a claimed entry back at the head of its channel
    pub fn release(&self, priority: JobPriority, job_id: &JobId, token: &ClaimToken) -> QueueResult<()> {
        self.channel(priority).release(job_id, token)?;
        self.work_available.notify_one();
        Ok(())
    }

    /// Settle a claim whose record update was rejected by the store.
    ///
    /// A terminal record loses its entry. A record that moved on under the
    /// claimant goes back to the head of its channel so the next claim reads
    /// it fresh. Store failures leave the claim to the visibility reaper.
    pub fn settle_rejected(&self, claim: &ClaimedEntry, rejection: &QueueError) {
        let settled = match rejection {
            QueueError::JobAlreadyTerminal => {
                self.drop_claim(claim.priority, &claim.job_id, &claim.token)
            }
            rejection if rejection.kind() == ErrorClass::Conflict => {
                self.release(claim.priority, &claim.job_id, &claim.token)
            }
            rejection => {
                error!(
                    job_id = %claim.job_id,
                    error = %rejection,
                    "record update failed, claim left to expire"
                );
                return;
            }
        };
        if let Err(e) = settled {
            debug!(job_id = %claim.job_id, error = %e, "claim already settled");
        }
    }

    pub fn has_ready(&self, priority: JobPriority) -> bool {
        self.channel(priority).has_ready()
    }

    /// Whether any channel holds an entry for `job_id`
    pub fn contains(&self, job_id: &JobId) -> bool {
        self.channels.iter().any(|channel| channel.contains(job_id))
    }

    /// Earliest delayed release across all channels
    pub fn next_release(&self) -> Option<Instant> {
        self.channels
            .iter()
            .filter_map(Channel::next_release)
            .min()
    }

    /// Reclaim expired claims in every channel
    pub fn reclaim_expired(&self) -> Vec<(JobPriority, JobId)> {
        let now = Instant::now();
        let reclaimed: Vec<(JobPriority, JobId)> = self
            .channels
            .iter()
            .flat_map(|channel| {
                channel
                    .reclaim_expired(now)
                    .into_iter()
                    .map(move |job_id| (channel.priority(), job_id))
            })
            .collect();
        if !reclaimed.is_empty() {
            self.work_available.notify_one();
        }
        reclaimed
    }

    /// Per-class waiting/delayed/active/completed/failed counts
    pub fn snapshot(&self) -> QueueSnapshot {
        PerClass {
            critical: self.channel(JobPriority::Critical).counts(),
            high: self.channel(JobPriority::High).counts(),
            normal: self.channel(JobPriority::Normal).counts(),
        }
    }

    /// Resolves once new work may be claimable
    pub async fn work_available(&self) {
        self.work_available.notified().await
    }

    /// Expire a claim immediately (test helper)
    pub fn force_visibility_expiry(&self, priority: JobPriority, job_id: &JobId) {
        self.channel(priority).force_visibility_expiry(job_id);
    }
}
