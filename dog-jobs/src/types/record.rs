use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{JobId, JobPriority};
use crate::{QueueError, QueueResult};

/// Job status lifecycle
///
/// `pending -> processing -> {completed | retrying | failed}`, and
/// `retrying -> processing` once the retry delay has elapsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Submitted and waiting in its channel
    Pending,

    /// Claimed by a worker
    Processing,

    /// Executor returned success
    Completed,

    /// Attempts exhausted or permanently failed
    Failed,

    /// Failed attempt, waiting out its backoff delay
    Retrying,
}

impl JobStatus {
    /// Check if the job is in a terminal state (completed or failed)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether `self -> next` is an edge of the state machine.
    ///
    /// `pending -> failed` covers a job whose queue admission failed after its
    /// record was written. `processing -> processing` is a reclaim after a
    /// visibility timeout and is only accepted with a higher attempt count.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Pending, Failed)
                | (Processing, Completed)
                | (Processing, Retrying)
                | (Processing, Failed)
                | (Processing, Processing)
                | (Retrying, Processing)
        )
    }

    /// Get the status name as a string
    pub fn name(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Retrying => "retrying",
        }
    }

    pub fn all() -> &'static [JobStatus] {
        &[
            Self::Pending,
            Self::Processing,
            Self::Completed,
            Self::Failed,
            Self::Retrying,
        ]
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::all()
            .iter()
            .copied()
            .find(|status| status.name() == s)
            .ok_or_else(|| QueueError::InvalidPayload(format!("unknown status: {}", s)))
    }
}

/// Job record as persisted by the job store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: JobId,

    /// Human label, not used for routing
    pub name: String,

    pub job_type: String,

    pub priority: JobPriority,

    pub status: JobStatus,

    /// Executor input
    pub payload: Value,

    /// Number of claims so far
    pub attempts: u32,

    pub max_attempts: u32,

    pub result: Option<Value>,

    pub error_message: Option<String>,

    pub submitter: Option<String>,

    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    /// Create a new pending job record
    pub fn new(
        job_id: JobId,
        name: String,
        job_type: String,
        priority: JobPriority,
        payload: Value,
        max_attempts: u32,
    ) -> Self {
        let now = Utc::now();
        Self {
            job_id,
            name,
            job_type,
            priority,
            status: JobStatus::Pending,
            payload,
            attempts: 0,
            max_attempts,
            result: None,
            error_message: None,
            submitter: None,
            created_at: now,
            started_at: None,
            completed_at: None,
            failed_at: None,
            updated_at: now,
        }
    }

    pub fn with_submitter(mut self, submitter: impl Into<String>) -> Self {
        self.submitter = Some(submitter.into());
        self
    }

    /// Apply a status update, enforcing the state machine.
    ///
    /// The update is rejected when the record has moved past the attempt the
    /// writer observed, so a lagging worker cannot overwrite a newer attempt.
    /// Timestamps are set once and never moved.
    pub fn apply(&mut self, update: &StatusUpdate) -> QueueResult<()> {
        if self.status.is_terminal() {
            return Err(QueueError::JobAlreadyTerminal);
        }

        if update.expected_attempts != self.attempts {
            return Err(QueueError::StaleUpdate {
                job_id: self.job_id.to_string(),
                current: self.attempts,
                expected: update.expected_attempts,
            });
        }

        let attempts = update.attempts.unwrap_or(self.attempts);
        let reclaim = self.status == JobStatus::Processing && update.status == JobStatus::Processing;
        if !self.status.can_transition_to(update.status) || (reclaim && attempts <= self.attempts) {
            return Err(QueueError::InvalidTransition {
                from: self.status.name().to_string(),
                to: update.status.name().to_string(),
            });
        }

        if attempts < self.attempts || attempts > self.max_attempts {
            return Err(QueueError::AttemptsExhausted {
                job_id: self.job_id.to_string(),
                max: self.max_attempts,
            });
        }

        self.status = update.status;
        self.attempts = attempts;
        self.updated_at = update.at;

        match update.status {
            JobStatus::Processing => {
                self.started_at.get_or_insert(update.at);
            }
            JobStatus::Completed => {
                self.result = update.result.clone();
                self.error_message = None;
                self.completed_at.get_or_insert(update.at);
            }
            JobStatus::Retrying => {
                self.error_message = update.error_message.clone();
            }
            JobStatus::Failed => {
                self.error_message = update.error_message.clone();
                self.failed_at.get_or_insert(update.at);
            }
            JobStatus::Pending => {}
        }

        Ok(())
    }
}

/// A guarded change to a job record
#[derive(Debug, Clone)]
pub struct StatusUpdate {
    pub status: JobStatus,

    /// Attempt count the writer observed; the update fails if the record differs
    pub expected_attempts: u32,

    /// New attempt count, if it changes
    pub attempts: Option<u32>,

    pub result: Option<Value>,

    pub error_message: Option<String>,

    pub at: DateTime<Utc>,
}

impl StatusUpdate {
    fn new(status: JobStatus, expected_attempts: u32) -> Self {
        Self {
            status,
            expected_attempts,
            attempts: None,
            result: None,
            error_message: None,
            at: Utc::now(),
        }
    }

    /// Claim: move to processing and count the attempt
    pub fn processing(expected_attempts: u32) -> Self {
        Self {
            attempts: Some(expected_attempts + 1),
            ..Self::new(JobStatus::Processing, expected_attempts)
        }
    }

    pub fn completed(expected_attempts: u32, result: Value) -> Self {
        Self {
            result: Some(result),
            ..Self::new(JobStatus::Completed, expected_attempts)
        }
    }

    pub fn retrying(expected_attempts: u32, error: impl Into<String>) -> Self {
        Self {
            error_message: Some(error.into()),
            ..Self::new(JobStatus::Retrying, expected_attempts)
        }
    }

    pub fn failed(expected_attempts: u32, error: impl Into<String>) -> Self {
        Self {
            error_message: Some(error.into()),
            ..Self::new(JobStatus::Failed, expected_attempts)
        }
    }
}
