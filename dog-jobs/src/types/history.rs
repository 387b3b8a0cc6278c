use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{JobId, JobPriority, JobRecord, JobStatus};

/// One row of the append-only audit trail, written on every transition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub job_id: JobId,

    /// Attempt number the transition belongs to
    pub attempt: u32,

    /// Status entered by the transition
    pub status: JobStatus,

    /// Execution time, set on attempt outcomes
    pub duration_ms: Option<u64>,

    pub error: Option<String>,

    pub priority: JobPriority,

    pub job_type: String,

    pub recorded_at: DateTime<Utc>,
}

impl HistoryEntry {
    /// Entry describing `record` as it is right now
    pub fn from_record(record: &JobRecord) -> Self {
        Self {
            job_id: record.job_id.clone(),
            attempt: record.attempts,
            status: record.status,
            duration_ms: None,
            error: match record.status {
                JobStatus::Retrying | JobStatus::Failed => record.error_message.clone(),
                _ => None,
            },
            priority: record.priority,
            job_type: record.job_type.clone(),
            recorded_at: record.updated_at,
        }
    }

    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    /// Whether this entry closes an execution attempt
    pub fn is_outcome(&self) -> bool {
        matches!(
            self.status,
            JobStatus::Completed | JobStatus::Retrying | JobStatus::Failed
        )
    }
}

/// Terminal failure archive entry. Created once, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterRecord {
    pub job_id: JobId,
    pub job_type: String,
    pub priority: JobPriority,

    /// Payload snapshot at escalation time
    pub payload: Value,

    pub failure_reason: String,

    pub attempts: u32,

    pub dead_lettered_at: DateTime<Utc>,
}

impl DeadLetterRecord {
    pub fn new(record: &JobRecord, failure_reason: impl Into<String>) -> Self {
        Self {
            job_id: record.job_id.clone(),
            job_type: record.job_type.clone(),
            priority: record.priority,
            payload: record.payload.clone(),
            failure_reason: failure_reason.into(),
            attempts: record.attempts,
            dead_lettered_at: Utc::now(),
        }
    }
}
