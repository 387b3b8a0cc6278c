//! Built-in executors.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{ExecutorRegistryBuilder, Job};
use crate::{JobError, QueueResult};

/// Simulated processing time of the built-in jobs
#[derive(Debug, Clone, Copy)]
pub struct BuiltinLatency {
    pub email: Duration,
    pub data: Duration,
}

impl Default for BuiltinLatency {
    fn default() -> Self {
        Self {
            email: Duration::from_secs(2),
            data: Duration::from_secs(3),
        }
    }
}

impl BuiltinLatency {
    /// No simulated delay, for tests
    pub fn none() -> Self {
        Self {
            email: Duration::ZERO,
            data: Duration::ZERO,
        }
    }
}

/// Register `email-processing` and `data-processing`
pub fn register_builtins(
    builder: &mut ExecutorRegistryBuilder,
    latency: BuiltinLatency,
) -> QueueResult<()> {
    builder
        .register_job::<EmailProcessing>(latency.email)?
        .register_job::<DataProcessing>(latency.data)?;
    Ok(())
}

/// Job: send an email to a list of recipients.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmailProcessing {
    #[serde(default)]
    pub recipients: Vec<String>,
    #[serde(default)]
    pub subject: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EmailReport {
    pub success: bool,
    pub emails_sent: usize,
}

#[async_trait]
impl Job for EmailProcessing {
    type Context = Duration;
    type Output = EmailReport;

    const JOB_TYPE: &'static str = "email-processing";

    async fn execute(self, latency: Duration) -> Result<EmailReport, JobError> {
        info!(
            recipients = self.recipients.len(),
            subject = self.subject.as_deref().unwrap_or(""),
            "sending email"
        );
        tokio::time::sleep(latency).await;
        Ok(EmailReport {
            success: true,
            emails_sent: self.recipients.len().max(1),
        })
    }
}

/// Job: process a batch of records.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataProcessing {
    #[serde(default)]
    pub record_count: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DataReport {
    pub success: bool,
    pub records_processed: u64,
}

#[async_trait]
impl Job for DataProcessing {
    type Context = Duration;
    type Output = DataReport;

    const JOB_TYPE: &'static str = "data-processing";

    async fn execute(self, latency: Duration) -> Result<DataReport, JobError> {
        let records = self.record_count.unwrap_or(100);
        info!(records, "processing data batch");
        tokio::time::sleep(latency).await;
        Ok(DataReport {
            success: true,
            records_processed: records,
        })
    }
}
