use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Submission request as received from the API layer.
///
/// `priority` stays a string until validation so that out-of-enum values are
/// rejected by the engine with a descriptive error.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitJob {
    pub name: String,
    pub priority: String,
    pub job_type: String,
    pub payload: Value,
    #[serde(default)]
    pub submitter: Option<String>,
    /// Overrides the configured default
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

impl SubmitJob {
    pub fn new(
        name: impl Into<String>,
        priority: impl Into<String>,
        job_type: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self {
            name: name.into(),
            priority: priority.into(),
            job_type: job_type.into(),
            payload,
            submitter: None,
            max_attempts: None,
        }
    }

    pub fn with_submitter(mut self, submitter: impl Into<String>) -> Self {
        self.submitter = Some(submitter.into());
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }
}
