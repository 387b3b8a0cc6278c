use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use super::{JobId, JobPriority, JobRecord, JobStatus};

/// Status view of a single job
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobView {
    pub job_id: JobId,
    pub name: String,
    pub job_type: String,
    pub priority: JobPriority,
    pub status: JobStatus,
    pub attempts: u32,
    pub max_attempts: u32,
    pub result: Option<Value>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
}

impl From<JobRecord> for JobView {
    fn from(record: JobRecord) -> Self {
        Self {
            job_id: record.job_id,
            name: record.name,
            job_type: record.job_type,
            priority: record.priority,
            status: record.status,
            attempts: record.attempts,
            max_attempts: record.max_attempts,
            result: record.result,
            error_message: record.error_message,
            created_at: record.created_at,
            started_at: record.started_at,
            completed_at: record.completed_at,
            failed_at: record.failed_at,
        }
    }
}

/// Row of a job listing
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSummary {
    pub job_id: JobId,
    pub name: String,
    pub priority: JobPriority,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
}

impl From<JobRecord> for JobSummary {
    fn from(record: JobRecord) -> Self {
        Self {
            job_id: record.job_id,
            name: record.name,
            priority: record.priority,
            status: record.status,
            created_at: record.created_at,
        }
    }
}
