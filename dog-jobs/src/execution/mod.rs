pub mod dispatcher;
pub mod limiter;
pub mod retry;

pub use dispatcher::{Dispatcher, VISIBILITY_EXHAUSTED};
pub use limiter::RateLimiter;
pub use retry::{BackoffSchedule, RetryController, RetryDecision};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use crate::{QueueError, QueueResult};

/// Handle for the background tasks started by `JobEngine::start`
pub struct WorkerHandle {
    shutdown_tx: watch::Sender<bool>,
    join_handles: Vec<JoinHandle<QueueResult<()>>>,
}

impl WorkerHandle {
    pub(crate) fn new(
        shutdown_tx: watch::Sender<bool>,
        join_handles: Vec<JoinHandle<QueueResult<()>>>,
    ) -> Self {
        Self {
            shutdown_tx,
            join_handles,
        }
    }

    /// Stop claiming, wait for in-flight executions to finish and stop the
    /// background tasks
    pub async fn shutdown(self) -> QueueResult<()> {
        let _ = self.shutdown_tx.send(true);
        for handle in self.join_handles {
            handle
                .await
                .map_err(|e| QueueError::Internal(format!("Worker join error: {}", e)))??;
        }
        info!("Workers stopped");
        Ok(())
    }
}
