use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::PriorityQueueSet;
use crate::QueueResult;

/// Visibility timeout reaper: makes claims that were never acknowledged or
/// returned claimable again
pub struct VisibilityReaper {
    queues: Arc<PriorityQueueSet>,
    interval: Duration,
}

impl VisibilityReaper {
    pub fn new(queues: Arc<PriorityQueueSet>, interval: Duration) -> Self {
        Self { queues, interval }
    }

    /// Run until shutdown is signalled
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> QueueResult<()> {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("Starting visibility reaper with interval: {:?}", self.interval);

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    let reclaimed = self.reap_expired();
                    if reclaimed > 0 {
                        info!("Reclaimed {} expired claims", reclaimed);
                    }
                }
            }
        }

        debug!("Visibility reaper stopped");
        Ok(())
    }

    /// Run one reaper cycle
    pub fn reap_expired(&self) -> usize {
        let reclaimed = self.queues.reclaim_expired();
        for (priority, job_id) in &reclaimed {
            warn!(%job_id, %priority, "claim visibility timeout expired, entry is claimable again");
        }
        reclaimed.len()
    }
}
