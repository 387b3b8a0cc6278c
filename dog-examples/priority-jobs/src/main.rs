mod jobs;

use std::time::Duration;

use anyhow::Result;
use dog_jobs::prelude::*;
use futures::StreamExt;
use serde_json::json;

use crate::jobs::{ReportContext, ReportGeneration};

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    let format: LogFormat = std::env::var("LOG_FORMAT")
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or_default();
    init_tracing(format)?;

    let config = EngineConfig::from_env()?;
    let snapshots: usize = std::env::var("DEMO_SNAPSHOTS")
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(4);

    let mut registry = ExecutorRegistry::builder();
    register_builtins(&mut registry, BuiltinLatency::default())?;
    registry.register_job::<ReportGeneration>(ReportContext::default())?;

    let engine = JobEngine::in_memory(config, registry.build())?;
    let workers = engine.start();

    let mut submitted = Vec::new();
    for (name, priority, job_type, payload) in [
        ("weekly digest", "normal", "email-processing", json!({ "recipients": ["team@example.com", "ops@example.com"] })),
        ("ledger import", "high", "data-processing", json!({ "recordCount": 2500 })),
        ("incident page", "critical", "email-processing", json!({ "recipients": ["oncall@example.com"], "subject": "sev1" })),
        ("usage report", "normal", "report-generation", json!({ "report": "usage", "pages": 3 })),
        ("billing report", "high", "report-generation", json!({ "report": "billing", "pages": 1 })),
        ("audit report", "critical", "report-generation", json!({ "report": "audit", "pages": 2 })),
        ("unnamed report", "normal", "report-generation", json!({ "report": "" })),
    ] {
        let job_id = engine
            .submit(SubmitJob::new(name, priority, job_type, payload).with_submitter("priority-jobs"))
            .await?;
        println!("[priority-jobs] submitted {} ({}, {})", job_id, priority, job_type);
        submitted.push(job_id);
    }

    let mut stream = engine.subscribe().take(snapshots);
    while let Some(snapshot) = stream.next().await {
        println!("{}", serde_json::to_string_pretty(&snapshot.derived)?);
    }

    tokio::time::timeout(Duration::from_secs(60), async {
        for job_id in &submitted {
            while !engine.status(job_id).await?.status.is_terminal() {
                tokio::time::sleep(Duration::from_millis(250)).await;
            }
        }
        Ok::<_, QueueError>(())
    })
    .await??;

    for job_id in &submitted {
        let view = engine.status(job_id).await?;
        println!(
            "[priority-jobs] {} {} after {} attempt(s)",
            view.job_id, view.status, view.attempts
        );
    }
    for dead in engine.dead_letters(None).await? {
        println!("[priority-jobs] dead letter {}: {}", dead.job_id, dead.failure_reason);
    }

    let dashboard = engine.dashboard().await?;
    println!("{}", serde_json::to_string_pretty(&dashboard)?);

    workers.shutdown().await?;
    Ok(())
}
