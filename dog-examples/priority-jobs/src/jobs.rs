use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dog_jobs::prelude::*;
use serde::{Deserialize, Serialize};

/// Shared state for report jobs
#[derive(Clone, Default)]
pub struct ReportContext {
    /// Runs so far, used to make the first run of every third report fail
    pub runs: Arc<AtomicU32>,
}

/// Job: render a tenant report, flaky on purpose so the demo shows retries
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportGeneration {
    pub report: String,
    #[serde(default)]
    pub pages: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportOutput {
    pub report: String,
    pub pages_rendered: u32,
}

#[async_trait]
impl Job for ReportGeneration {
    type Context = ReportContext;
    type Output = ReportOutput;

    const JOB_TYPE: &'static str = "report-generation";

    async fn execute(self, ctx: Self::Context) -> Result<Self::Output, JobError> {
        let run = ctx.runs.fetch_add(1, Ordering::SeqCst) + 1;
        if self.report.is_empty() {
            return Err(JobError::permanent("report name is required"));
        }
        if run % 3 == 0 {
            return Err(JobError::retryable(format!("renderer busy on run {}", run)));
        }

        tokio::time::sleep(Duration::from_millis(200 * u64::from(self.pages.max(1)))).await;
        tracing::info!(report = %self.report, pages = self.pages, "report rendered");

        Ok(ReportOutput {
            report: self.report,
            pages_rendered: self.pages.max(1),
        })
    }
}
