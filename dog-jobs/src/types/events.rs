use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{JobId, JobPriority};

/// Lifecycle events published by the engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JobEvent {
    /// Job record created and entry admitted to its channel
    Submitted {
        job_id: JobId,
        job_type: String,
        priority: JobPriority,
        at: DateTime<Utc>,
    },

    /// Entry claimed from its channel by the dispatcher
    Claimed {
        job_id: JobId,
        priority: JobPriority,
        at: DateTime<Utc>,
    },

    /// Attempt failed, job will be claimable again after `delay_ms`
    Retrying {
        job_id: JobId,
        attempt: u32,
        delay_ms: u64,
        error: String,
        at: DateTime<Utc>,
    },

    /// Job completed successfully
    Completed {
        job_id: JobId,
        attempt: u32,
        at: DateTime<Utc>,
    },

    /// Job failed permanently
    Failed {
        job_id: JobId,
        attempt: u32,
        error: String,
        at: DateTime<Utc>,
    },

    /// Dead-letter record written
    DeadLettered {
        job_id: JobId,
        reason: String,
        at: DateTime<Utc>,
    },
}

impl JobEvent {
    /// Get event type name as string
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Submitted { .. } => "submitted",
            Self::Claimed { .. } => "claimed",
            Self::Retrying { .. } => "retrying",
            Self::Completed { .. } => "completed",
            Self::Failed { .. } => "failed",
            Self::DeadLettered { .. } => "dead_lettered",
        }
    }

    /// Get the job ID from any event
    pub fn job_id(&self) -> &JobId {
        match self {
            Self::Submitted { job_id, .. }
            | Self::Claimed { job_id, .. }
            | Self::Retrying { job_id, .. }
            | Self::Completed { job_id, .. }
            | Self::Failed { job_id, .. }
            | Self::DeadLettered { job_id, .. } => job_id,
        }
    }

    /// Get the timestamp from any event
    pub fn timestamp(&self) -> &DateTime<Utc> {
        match self {
            Self::Submitted { at, .. }
            | Self::Claimed { at, .. }
            | Self::Retrying { at, .. }
            | Self::Completed { at, .. }
            | Self::Failed { at, .. }
            | Self::DeadLettered { at, .. } => at,
        }
    }
}
