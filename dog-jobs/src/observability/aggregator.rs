use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::{future, stream, StreamExt};
use tokio::sync::{broadcast, watch};
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};
use tracing::{debug, error, info, warn};

use super::metrics::{DashboardSnapshot, DerivedMetrics, QueueSnapshot, SystemMetrics};
use crate::config::EngineConfig;
use crate::queue::PriorityQueueSet;
use crate::store::JobStore;
use crate::{BoxStream, QueueResult};

/// Read side of the engine: point-in-time snapshots and a broadcast stream.
///
/// Sampling only reads queue and store state, it never takes a claim or
/// holds a lock across an await.
#[derive(Clone)]
pub struct MetricsAggregator {
    store: Arc<dyn JobStore>,
    queues: Arc<PriorityQueueSet>,
    snapshots: broadcast::Sender<DashboardSnapshot>,
    interval: Duration,
    stream_window: Duration,
    dashboard_window: Duration,
}

impl MetricsAggregator {
    pub fn new(store: Arc<dyn JobStore>, queues: Arc<PriorityQueueSet>, config: &EngineConfig) -> Self {
        let (snapshots, _) = broadcast::channel(config.snapshot_capacity);
        Self {
            store,
            queues,
            snapshots,
            interval: config.metrics_interval,
            stream_window: config.stream_window,
            dashboard_window: config.dashboard_window,
        }
    }

    /// Per-class counts from the queue set
    pub fn queue_snapshot(&self) -> QueueSnapshot {
        self.queues.snapshot()
    }

    /// Throughput, failure rate and latency over the last `window`
    pub async fn system_snapshot(&self, window: Duration) -> QueueResult<SystemMetrics> {
        let since = chrono::Duration::from_std(window)
            .ok()
            .and_then(|window| Utc::now().checked_sub_signed(window))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        self.store.aggregate_stats(since).await
    }

    /// Combined snapshot over the dashboard window
    pub async fn dashboard(&self) -> QueueResult<DashboardSnapshot> {
        self.snapshot(self.dashboard_window).await
    }

    async fn snapshot(&self, window: Duration) -> QueueResult<DashboardSnapshot> {
        let queue_metrics = self.queue_snapshot();
        let job_stats = self.store.count_by_status().await?;
        let system_metrics = self.system_snapshot(window).await?;
        Ok(DashboardSnapshot {
            timestamp: Utc::now(),
            derived: DerivedMetrics::from_queue(&queue_metrics),
            queue_metrics,
            job_stats,
            system_metrics,
        })
    }

    /// Lazy stream of snapshots: one sampled on first poll, then one per
    /// producer tick until the caller drops it.
    ///
    /// A subscriber that falls more than the channel capacity behind is
    /// ended; other subscribers and the producer are unaffected.
    pub fn subscribe(&self) -> BoxStream<DashboardSnapshot> {
        let receiver = self.snapshots.subscribe();
        let aggregator = self.clone();

        let initial = stream::once(async move { aggregator.snapshot(aggregator.stream_window).await })
            .filter_map(|snapshot| {
                future::ready(match snapshot {
                    Ok(snapshot) => Some(snapshot),
                    Err(e) => {
                        error!(error = %e, "failed to sample initial snapshot");
                        None
                    }
                })
            });

        let live = BroadcastStream::new(receiver)
            .take_while(|item| {
                if let Err(BroadcastStreamRecvError::Lagged(skipped)) = item {
                    warn!(skipped, "metrics subscriber lagging, closing its stream");
                }
                future::ready(item.is_ok())
            })
            .filter_map(|item| future::ready(item.ok()));

        Box::pin(initial.chain(live))
    }

    pub fn subscriber_count(&self) -> usize {
        self.snapshots.receiver_count()
    }

    /// Log processed/failed totals, throughput since `started` and the
    /// failure rate
    fn log_summary(&self, started: Instant) {
        let totals = self.queue_snapshot().totals();
        let uptime = started.elapsed();
        let finished = totals.completed + totals.failed;
        let throughput = if uptime.is_zero() {
            0.0
        } else {
            totals.completed as f64 / uptime.as_secs_f64()
        };
        let failure_rate = if finished == 0 {
            0.0
        } else {
            totals.failed as f64 / finished as f64 * 100.0
        };

        info!(
            processed = totals.completed,
            failed = totals.failed,
            active = totals.active,
            throughput = %format!("{:.2}/s", throughput),
            failure_rate = %format!("{:.2}%", failure_rate),
            uptime_secs = uptime.as_secs(),
            "worker metrics"
        );
    }

    /// Producer loop: logs a summary on every tick and samples a snapshot
    /// while anyone is subscribed
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> QueueResult<()> {
        let started = Instant::now();
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!("Metrics producer started with interval: {:?}", self.interval);

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    self.log_summary(started);
                    if self.snapshots.receiver_count() == 0 {
                        continue;
                    }
                    match self.snapshot(self.stream_window).await {
                        Ok(snapshot) => {
                            // no receivers left between the check and the send
                            let _ = self.snapshots.send(snapshot);
                        }
                        Err(e) => error!(error = %e, "failed to sample metrics"),
                    }
                }
            }
        }

        debug!("Metrics producer stopped");
        Ok(())
    }
}
