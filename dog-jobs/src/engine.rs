use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::{future, StreamExt};
use tokio::sync::{broadcast, watch};
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};
use tracing::{error, info, instrument, warn};

use crate::config::EngineConfig;
use crate::execution::dispatcher::ExecutionContext;
use crate::execution::{Dispatcher, RetryController, WorkerHandle};
use crate::job::ExecutorRegistry;
use crate::observability::{DashboardSnapshot, MetricsAggregator, QueueSnapshot, SystemMetrics};
use crate::queue::{PriorityQueueSet, QueueEntry, VisibilityReaper};
use crate::store::JobStore;
use crate::{
    BoxStream, DeadLetterRecord, HistoryEntry, JobEvent, JobId, JobPriority, JobRecord, JobStatus,
    JobSummary, JobView, QueueError, QueueResult, StatusUpdate, SubmitJob,
};

/// Listing limit applied when the caller gives none
pub const DEFAULT_LIST_LIMIT: usize = 100;

const NAME_LEN: std::ops::RangeInclusive<usize> = 3..=255;

/// Job lifecycle and dispatch engine.
///
/// Owns the priority queue set and the executor registry, and talks to a
/// [`JobStore`] for everything persisted. `submit`, the status/list queries
/// and the metrics reads can be used without starting workers; `start`
/// launches the dispatcher, the visibility reaper and the metrics producer.
pub struct JobEngine {
    config: EngineConfig,
    store: Arc<dyn JobStore>,
    queues: Arc<PriorityQueueSet>,
    registry: Arc<ExecutorRegistry>,
    events: broadcast::Sender<JobEvent>,
    metrics: MetricsAggregator,
}

impl JobEngine {
    pub fn new(config: EngineConfig, store: Arc<dyn JobStore>, registry: ExecutorRegistry) -> QueueResult<Self> {
        config.validate()?;
        let queues = Arc::new(PriorityQueueSet::new(config.visibility_timeout));
        let (events, _) = broadcast::channel(config.event_capacity);
        let metrics = MetricsAggregator::new(store.clone(), queues.clone(), &config);

        Ok(Self {
            config,
            store,
            queues,
            registry: Arc::new(registry),
            events,
            metrics,
        })
    }

    /// Engine backed by an in-process store
    #[cfg(feature = "memory")]
    pub fn in_memory(config: EngineConfig, registry: ExecutorRegistry) -> QueueResult<Self> {
        Self::new(config, Arc::new(crate::store::MemoryJobStore::new()), registry)
    }

    /// Validate a submission, persist it as `pending` and admit it to the
    /// channel of its class.
    ///
    /// Rejected submissions leave neither a record nor a queue entry.
    #[instrument(skip(self, request), fields(job_type = %request.job_type, priority = %request.priority))]
    pub async fn submit(&self, request: SubmitJob) -> QueueResult<JobId> {
        let priority: JobPriority = request.priority.parse()?;

        let name_len = request.name.trim().chars().count();
        if !NAME_LEN.contains(&name_len) {
            return Err(QueueError::InvalidName(format!(
                "name must be between {} and {} characters",
                NAME_LEN.start(),
                NAME_LEN.end()
            )));
        }

        if !self.registry.is_registered(&request.job_type) {
            return Err(QueueError::UnknownJobType(request.job_type));
        }

        if !request.payload.is_object() {
            return Err(QueueError::InvalidPayload("payload must be a JSON object".to_string()));
        }

        let max_attempts = request.max_attempts.unwrap_or(self.config.default_max_attempts);
        if max_attempts == 0 {
            return Err(QueueError::InvalidPayload("max_attempts must be at least 1".to_string()));
        }

        let job_id = JobId::for_type(&request.job_type);
        let mut record = JobRecord::new(
            job_id.clone(),
            request.name,
            request.job_type.clone(),
            priority,
            request.payload.clone(),
            max_attempts,
        );
        if let Some(submitter) = request.submitter {
            record = record.with_submitter(submitter);
        }
        let record = self.store.create(record).await?;
        // written before the entry is claimable so it always leads the trail
        self.append_history(HistoryEntry::from_record(&record)).await;

        let entry = QueueEntry::new(job_id.clone(), request.job_type.clone(), request.payload);
        if let Err(e) = self.queues.enqueue(priority, entry) {
            error!(%job_id, error = %e, "queue admission failed");
            let reason = format!("queue admission failed: {}", e);
            match self.store.update_status(&job_id, StatusUpdate::failed(0, reason)).await {
                Ok(failed) => self.append_history(HistoryEntry::from_record(&failed)).await,
                Err(mark) => error!(%job_id, error = %mark, "could not mark unadmitted job failed"),
            }
            return Err(e);
        }

        let _ = self.events.send(JobEvent::Submitted {
            job_id: job_id.clone(),
            job_type: request.job_type,
            priority,
            at: Utc::now(),
        });

        info!(%job_id, "job submitted");
        Ok(job_id)
    }

    async fn append_history(&self, entry: HistoryEntry) {
        let job_id = entry.job_id.clone();
        if let Err(e) = self.store.append_history(entry).await {
            warn!(%job_id, error = %e, "failed to append job history");
        }
    }

    /// Current view of one job
    pub async fn status(&self, job_id: &JobId) -> QueueResult<JobView> {
        self.store.get(job_id).await.map(JobView::from)
    }

    /// Jobs in `status`, newest first
    pub async fn list_by_status(&self, status: JobStatus, limit: Option<usize>) -> QueueResult<Vec<JobSummary>> {
        let records = self
            .store
            .list_by_status(status, limit.unwrap_or(DEFAULT_LIST_LIMIT))
            .await?;
        Ok(records.into_iter().map(JobSummary::from).collect())
    }

    /// Jobs of one class, newest first
    pub async fn list_by_priority(&self, priority: JobPriority, limit: Option<usize>) -> QueueResult<Vec<JobSummary>> {
        let records = self
            .store
            .list_by_priority(priority, limit.unwrap_or(DEFAULT_LIST_LIMIT))
            .await?;
        Ok(records.into_iter().map(JobSummary::from).collect())
    }

    /// Audit trail of one job, oldest first
    pub async fn history(&self, job_id: &JobId) -> QueueResult<Vec<HistoryEntry>> {
        self.store.get(job_id).await?;
        self.store.history(job_id).await
    }

    /// Most recent dead-letter records
    pub async fn dead_letters(&self, limit: Option<usize>) -> QueueResult<Vec<DeadLetterRecord>> {
        self.store.dead_letters(limit.unwrap_or(DEFAULT_LIST_LIMIT)).await
    }

    pub fn queue_snapshot(&self) -> QueueSnapshot {
        self.metrics.queue_snapshot()
    }

    pub async fn system_snapshot(&self, window: Duration) -> QueueResult<SystemMetrics> {
        self.metrics.system_snapshot(window).await
    }

    pub async fn dashboard(&self) -> QueueResult<DashboardSnapshot> {
        self.metrics.dashboard().await
    }

    /// Dashboard snapshots every metrics interval until the stream is dropped.
    /// Snapshots after the first are produced once the engine is started.
    pub fn subscribe(&self) -> BoxStream<DashboardSnapshot> {
        self.metrics.subscribe()
    }

    /// Lifecycle events from now on. A subscriber that falls behind skips the
    /// events it missed.
    pub fn events(&self) -> BoxStream<JobEvent> {
        let stream = BroadcastStream::new(self.events.subscribe()).filter_map(|item| {
            future::ready(match item {
                Ok(event) => Some(event),
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    warn!(skipped, "event subscriber lagging, events dropped");
                    None
                }
            })
        });
        Box::pin(stream)
    }

    /// Start the dispatcher, the visibility reaper and the metrics producer.
    ///
    /// Concurrency and rate limits are enforced per handle; start one handle
    /// per engine.
    pub fn start(&self) -> WorkerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let ctx = Arc::new(ExecutionContext {
            store: self.store.clone(),
            queues: self.queues.clone(),
            registry: self.registry.clone(),
            retry: RetryController::new(
                self.store.clone(),
                self.queues.clone(),
                self.events.clone(),
                self.config.backoff.clone(),
            ),
            events: self.events.clone(),
            execution_timeout: self.config.execution_timeout,
        });

        let dispatcher = Dispatcher::new(ctx, &self.config);
        let reaper = VisibilityReaper::new(self.queues.clone(), self.config.reaper_interval);

        let join_handles = vec![
            tokio::spawn(dispatcher.run(shutdown_rx.clone())),
            tokio::spawn(reaper.run(shutdown_rx.clone())),
            tokio::spawn(self.metrics.clone().run(shutdown_rx)),
        ];

        info!(
            job_types = ?self.registry.job_types(),
            max_concurrency = ?self.config.max_concurrency,
            "job engine started"
        );
        WorkerHandle::new(shutdown_tx, join_handles)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &ExecutorRegistry {
        &self.registry
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    pub fn metrics(&self) -> &MetricsAggregator {
        &self.metrics
    }

    /// Whether any channel holds an entry for the job
    pub fn is_queued(&self, job_id: &JobId) -> bool {
        self.queues.contains(job_id)
    }

    /// Expire a claim immediately (test helper)
    pub fn force_visibility_expiry(&self, priority: JobPriority, job_id: &JobId) {
        self.queues.force_visibility_expiry(priority, job_id);
    }
}
