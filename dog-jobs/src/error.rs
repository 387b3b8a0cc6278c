use thiserror::Error;

/// Result type for engine operations
pub type QueueResult<T> = Result<T, QueueError>;

/// Errors raised by the engine, its queue and its store
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueueError {
    #[error("Invalid priority: {0} (expected critical, high or normal)")]
    InvalidPriority(String),

    #[error("Unknown job type: {0}")]
    UnknownJobType(String),

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Invalid job name: {0}")]
    InvalidName(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Job already exists: {0}")]
    DuplicateJob(String),

    #[error("Job type already registered: {0}")]
    DuplicateJobType(String),

    #[error("Invalid claim token for job {0}")]
    InvalidClaimToken(String),

    #[error("Stale update for job {job_id}: record is at attempt {current}, writer expected {expected}")]
    StaleUpdate {
        job_id: String,
        current: u32,
        expected: u32,
    },

    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Attempt limit reached for job {job_id} (max: {max})")]
    AttemptsExhausted { job_id: String, max: u32 },

    #[error("Job is already in terminal state")]
    JobAlreadyTerminal,

    #[error("Store error: {0}")]
    Store(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Coarse classification of a [`QueueError`], for callers mapping errors to
/// their own surface (status codes, exit codes, retry decisions).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Validation,
    NotFound,
    Conflict,
    Infrastructure,
    Internal,
}

impl QueueError {
    pub fn kind(&self) -> ErrorClass {
        match self {
            Self::InvalidPriority(_)
            | Self::UnknownJobType(_)
            | Self::InvalidPayload(_)
            | Self::InvalidName(_)
            | Self::InvalidConfig(_) => ErrorClass::Validation,
            Self::JobNotFound(_) => ErrorClass::NotFound,
            Self::DuplicateJob(_)
            | Self::DuplicateJobType(_)
            | Self::InvalidClaimToken(_)
            | Self::StaleUpdate { .. }
            | Self::InvalidTransition { .. }
            | Self::AttemptsExhausted { .. }
            | Self::JobAlreadyTerminal => ErrorClass::Conflict,
            Self::Store(_) => ErrorClass::Infrastructure,
            Self::SerializationError(_) | Self::Internal(_) => {
                ErrorClass::Internal
            }
        }
    }

    /// Infrastructure errors are transient: the outer request may be retried.
    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorClass::Infrastructure
    }
}

/// Job execution outcome - determines retry behavior
#[derive(Error, Debug, Clone, PartialEq)]
pub enum JobError {
    /// Retryable error - will schedule retry if attempts remain
    #[error("{0}")]
    Retryable(String),

    /// Permanent error - fail immediately, no retry
    #[error("{0}")]
    Permanent(String),
}

impl JobError {
    /// Create a retryable error
    pub fn retryable(msg: impl Into<String>) -> Self {
        Self::Retryable(msg.into())
    }

    /// Create a permanent error
    pub fn permanent(msg: impl Into<String>) -> Self {
        Self::Permanent(msg.into())
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable(_))
    }

    /// Get the error message
    pub fn message(&self) -> &str {
        match self {
            Self::Retryable(msg) | Self::Permanent(msg) => msg,
        }
    }
}

impl From<serde_json::Error> for QueueError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationError(err.to_string())
    }
}
