use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::{broadcast, watch, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, info_span, warn, Instrument};

use super::limiter::RateLimiter;
use super::retry::RetryController;
use crate::config::{EngineConfig, PerClass};
use crate::job::ExecutorRegistry;
use crate::queue::{ClaimedEntry, PriorityQueueSet};
use crate::store::JobStore;
use crate::{HistoryEntry, JobError, JobEvent, JobPriority, JobRecord, QueueError, QueueResult, StatusUpdate};

/// Reason recorded when a claim times out on the job's last allowed attempt
pub const VISIBILITY_EXHAUSTED: &str = "visibility timeout expired on final attempt";

// Longest the idle dispatcher sleeps without a wake-up reason.
const IDLE_RECHECK: Duration = Duration::from_secs(1);

/// State shared by every execution task
pub(crate) struct ExecutionContext {
    pub store: Arc<dyn JobStore>,
    pub queues: Arc<PriorityQueueSet>,
    pub registry: Arc<ExecutorRegistry>,
    pub retry: RetryController,
    pub events: broadcast::Sender<JobEvent>,
    pub execution_timeout: Duration,
}

/// Claims work in priority order and runs it under per-class concurrency and
/// rate limits.
///
/// Classes are scanned critical, high, normal on every pass. A class without
/// ready work, at its concurrency ceiling, or out of rate tokens is skipped,
/// so lower classes are never blocked by it. Claims beyond a limit are
/// deferred, never dropped.
pub struct Dispatcher {
    ctx: Arc<ExecutionContext>,
    slots: PerClass<Arc<Semaphore>>,
    limiters: [RateLimiter; 3],
}

impl Dispatcher {
    pub(crate) fn new(ctx: Arc<ExecutionContext>, config: &EngineConfig) -> Self {
        let slots = |priority| Arc::new(Semaphore::new(config.max_concurrency.get(priority)));
        let limiter = |priority| RateLimiter::new(config.claims_per_second.get(priority));
        Self {
            ctx,
            slots: PerClass {
                critical: slots(JobPriority::Critical),
                high: slots(JobPriority::High),
                normal: slots(JobPriority::Normal),
            },
            limiters: [
                limiter(JobPriority::Critical),
                limiter(JobPriority::High),
                limiter(JobPriority::Normal),
            ],
        }
    }

    fn slots(&self, priority: JobPriority) -> &Arc<Semaphore> {
        match priority {
            JobPriority::Critical => &self.slots.critical,
            JobPriority::High => &self.slots.high,
            JobPriority::Normal => &self.slots.normal,
        }
    }

    /// Run the dispatch loop until shutdown, then wait for in-flight jobs
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> QueueResult<()> {
        let mut tasks = JoinSet::new();
        info!("Dispatcher started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            while let Some(joined) = tasks.try_join_next() {
                log_join(joined);
            }

            let mut wake_at = None;
            if let Some((claim, permit)) = self.claim_next(&mut wake_at) {
                let _ = self.ctx.events.send(JobEvent::Claimed {
                    job_id: claim.job_id.clone(),
                    priority: claim.priority,
                    at: Utc::now(),
                });
                let ctx = self.ctx.clone();
                tasks.spawn(async move {
                    let _permit = permit;
                    ctx.process(claim).await;
                });
                continue;
            }

            let deadline = [wake_at, self.ctx.queues.next_release()]
                .into_iter()
                .flatten()
                .min()
                .unwrap_or_else(|| Instant::now() + IDLE_RECHECK);

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = self.ctx.queues.work_available() => {}
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => log_join(joined),
                _ = sleep_until(deadline) => {}
            }
        }

        info!(in_flight = tasks.len(), "Dispatcher stopping, draining in-flight jobs");
        while let Some(joined) = tasks.join_next().await {
            log_join(joined);
        }
        info!("Dispatcher stopped");
        Ok(())
    }

    /// Claim from the highest class that can take work right now
    fn claim_next(&mut self, wake_at: &mut Option<Instant>) -> Option<(ClaimedEntry, OwnedSemaphorePermit)> {
        for priority in JobPriority::all() {
            if !self.ctx.queues.has_ready(*priority) {
                continue;
            }

            // saturated: a finishing task wakes the loop
            let Ok(permit) = self.slots(*priority).clone().try_acquire_owned() else {
                continue;
            };

            if let Err(wait) = self.limiters[priority.index()].try_acquire() {
                let at = Instant::now() + wait;
                *wake_at = Some(wake_at.map_or(at, |current| current.min(at)));
                continue;
            }

            if let Some(claim) = self.ctx.queues.claim(*priority) {
                return Some((claim, permit));
            }
        }
        None
    }
}

fn log_join(joined: Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        error!(error = %e, "job task aborted");
    }
}

impl ExecutionContext {
    /// Drive one claimed entry through an attempt
    pub(crate) async fn process(&self, claim: ClaimedEntry) {
        let span = info_span!(
            "job",
            job_id = %claim.job_id,
            job_type = %claim.job_type,
            priority = %claim.priority,
        );
        self.process_claim(claim).instrument(span).await
    }

    async fn process_claim(&self, claim: ClaimedEntry) {
        let record = match self.store.get(&claim.job_id).await {
            Ok(record) => record,
            Err(QueueError::JobNotFound(_)) => {
                warn!("queue entry has no job record, dropping it");
                let _ = self.queues.drop_claim(claim.priority, &claim.job_id, &claim.token);
                return;
            }
            Err(e) => {
                // left in flight, reclaimed after the visibility timeout
                error!(error = %e, "failed to load job record");
                return;
            }
        };

        if record.status.is_terminal() {
            debug!(status = %record.status, "dropping entry of terminal job");
            let _ = self.queues.drop_claim(claim.priority, &claim.job_id, &claim.token);
            return;
        }

        if record.attempts >= record.max_attempts {
            self.retry.escalate(&record, &claim, VISIBILITY_EXHAUSTED, None).await;
            return;
        }

        let record = match self
            .store
            .update_status(&claim.job_id, StatusUpdate::processing(record.attempts))
            .await
        {
            Ok(record) => record,
            Err(e) => {
                warn!(error = %e, "could not mark job processing");
                self.queues.settle_rejected(&claim, &e);
                return;
            }
        };
        self.append_history(HistoryEntry::from_record(&record)).await;
        debug!(attempt = record.attempts, "executing job");

        let started = Instant::now();
        let outcome = self.execute(&claim).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(result) => self.complete(&record, &claim, result, duration_ms).await,
            Err(job_error) => {
                self.retry
                    .handle_failure(&record, &claim, job_error, duration_ms)
                    .await
            }
        }
    }

    /// Run the executor in its own task so a panic or timeout becomes a
    /// failed attempt instead of taking the worker down
    async fn execute(&self, claim: &ClaimedEntry) -> Result<Value, JobError> {
        let registry = self.registry.clone();
        let job_type = claim.job_type.clone();
        let payload = claim.payload.clone();
        let mut handle = tokio::spawn(
            async move { registry.execute(&job_type, payload).await }.in_current_span(),
        );

        match tokio::time::timeout(self.execution_timeout, &mut handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => Err(JobError::retryable(format!(
                "executor panicked: {}",
                join_error
            ))),
            Err(_) => {
                handle.abort();
                Err(JobError::retryable(format!(
                    "execution timed out after {:?}",
                    self.execution_timeout
                )))
            }
        }
    }

    async fn complete(&self, record: &JobRecord, claim: &ClaimedEntry, result: Value, duration_ms: u64) {
        let updated = match self
            .store
            .update_status(&record.job_id, StatusUpdate::completed(record.attempts, result))
            .await
        {
            Ok(updated) => updated,
            Err(e) => {
                warn!(error = %e, "discarding completion of superseded attempt");
                self.queues.settle_rejected(claim, &e);
                return;
            }
        };
        self.append_history(HistoryEntry::from_record(&updated).with_duration_ms(duration_ms))
            .await;

        if let Err(e) = self.queues.ack(claim.priority, &claim.job_id, &claim.token) {
            warn!(error = %e, "claim lost before ack, entry already reclaimed");
        }

        info!(attempt = updated.attempts, duration_ms, "job completed");
        let _ = self.events.send(JobEvent::Completed {
            job_id: updated.job_id,
            attempt: updated.attempts,
            at: Utc::now(),
        });
    }

    async fn append_history(&self, entry: HistoryEntry) {
        if let Err(e) = self.store.append_history(entry).await {
            warn!(error = %e, "failed to append job history");
        }
    }
}
