use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio_stream::StreamExt;

use dog_jobs::config::PerClass;
use dog_jobs::execution::VISIBILITY_EXHAUSTED;
use dog_jobs::{
    BackoffSchedule, EngineConfig, Executor, ExecutorRegistry, JobEngine, JobError, JobEvent,
    JobId, JobStatus, JobView, QueueError, StatusUpdate, SubmitJob,
};

/// Fails the first `fail_first` runs of each job key, then succeeds
struct Scripted {
    job_type: &'static str,
    fail_first: u32,
    permanent: bool,
    delay: Duration,
    runs: Mutex<HashMap<String, u32>>,
    order: Mutex<Vec<String>>,
    running: AtomicUsize,
    peak: AtomicUsize,
}

impl Scripted {
    fn new(job_type: &'static str) -> Self {
        Self {
            job_type,
            fail_first: 0,
            permanent: false,
            delay: Duration::ZERO,
            runs: Mutex::new(HashMap::new()),
            order: Mutex::new(Vec::new()),
            running: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    fn failing(mut self, fail_first: u32) -> Self {
        self.fail_first = fail_first;
        self
    }

    fn permanent(mut self) -> Self {
        self.permanent = true;
        self
    }

    fn slow(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn runs_of(&self, key: &str) -> u32 {
        self.runs.lock().unwrap().get(key).copied().unwrap_or(0)
    }
}

#[async_trait]
impl Executor for Scripted {
    fn job_type(&self) -> &str {
        self.job_type
    }

    async fn execute(&self, payload: Value) -> Result<Value, JobError> {
        let key = payload["key"].as_str().unwrap_or_default().to_string();
        let run = {
            let mut runs = self.runs.lock().unwrap();
            let run = runs.entry(key.clone()).or_insert(0);
            *run += 1;
            *run
        };
        self.order.lock().unwrap().push(key.clone());

        let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(running, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.running.fetch_sub(1, Ordering::SeqCst);

        if run <= self.fail_first {
            let message = format!("attempt {} of {} failed", run, key);
            return Err(if self.permanent {
                JobError::permanent(message)
            } else {
                JobError::retryable(message)
            });
        }
        Ok(json!({ "key": key, "run": run }))
    }
}

fn fast_config() -> EngineConfig {
    EngineConfig::default()
        .with_backoff(BackoffSchedule::from_millis(&[10, 20]))
        .with_claims_per_second(PerClass::uniform(1_000))
        .with_reaper_interval(Duration::from_millis(20))
        .with_metrics_interval(Duration::from_millis(50))
}

fn engine_with<const N: usize>(config: EngineConfig, executors: [Arc<dyn Executor>; N]) -> JobEngine {
    let mut builder = ExecutorRegistry::builder();
    for executor in executors {
        builder.register(executor).unwrap();
    }
    JobEngine::in_memory(config, builder.build()).unwrap()
}

fn job(key: &str, priority: &str, job_type: &str) -> SubmitJob {
    SubmitJob::new(format!("job {}", key), priority, job_type, json!({ "key": key }))
}

async fn wait_for_terminal(engine: &JobEngine, job_id: &JobId) -> JobView {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let view = engine.status(job_id).await.unwrap();
            if view.status.is_terminal() {
                return view;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("job did not reach a terminal state")
}

/// L1. Fail twice, succeed on the third attempt
#[tokio::test]
async fn test_fails_twice_then_completes() {
    let executor = Arc::new(Scripted::new("flaky").failing(2));
    let engine = engine_with(fast_config(), [executor.clone()]);
    let workers = engine.start();

    let job_id = engine.submit(job("a", "normal", "flaky")).await.unwrap();
    let view = wait_for_terminal(&engine, &job_id).await;

    assert_eq!(view.status, JobStatus::Completed);
    assert_eq!(view.attempts, 3);
    assert_eq!(view.result, Some(json!({ "key": "a", "run": 3 })));
    assert!(view.error_message.is_none());
    assert!(engine.dead_letters(None).await.unwrap().is_empty());
    assert!(!engine.is_queued(&job_id));

    let statuses: Vec<JobStatus> = engine
        .history(&job_id)
        .await
        .unwrap()
        .iter()
        .map(|entry| entry.status)
        .collect();
    assert_eq!(
        statuses,
        vec![
            JobStatus::Pending,
            JobStatus::Processing,
            JobStatus::Retrying,
            JobStatus::Processing,
            JobStatus::Retrying,
            JobStatus::Processing,
            JobStatus::Completed,
        ]
    );

    workers.shutdown().await.unwrap();
}

/// L2. Three failures exhaust the job into the dead-letter store
#[tokio::test]
async fn test_exhaustion_writes_one_dead_letter() {
    let executor = Arc::new(Scripted::new("broken").failing(u32::MAX));
    let engine = engine_with(fast_config(), [executor.clone()]);
    let workers = engine.start();

    let job_id = engine.submit(job("b", "high", "broken")).await.unwrap();
    let view = wait_for_terminal(&engine, &job_id).await;

    assert_eq!(view.status, JobStatus::Failed);
    assert_eq!(view.attempts, 3);
    assert_eq!(view.error_message.as_deref(), Some("attempt 3 of b failed"));
    assert!(view.failed_at.is_some());
    assert_eq!(executor.runs_of("b"), 3);

    let dead = engine.dead_letters(None).await.unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].job_id, job_id);
    assert_eq!(dead[0].attempts, 3);
    assert_eq!(dead[0].failure_reason, "attempt 3 of b failed");
    assert_eq!(dead[0].payload, json!({ "key": "b" }));

    assert!(!engine.is_queued(&job_id));
    assert_eq!(engine.queue_snapshot().high.failed, 1);

    workers.shutdown().await.unwrap();
}

/// L3. Permanent errors skip the remaining attempts
#[tokio::test]
async fn test_permanent_error_is_not_retried() {
    let executor = Arc::new(Scripted::new("strict").failing(u32::MAX).permanent());
    let engine = engine_with(fast_config(), [executor.clone()]);
    let workers = engine.start();

    let job_id = engine.submit(job("p", "normal", "strict")).await.unwrap();
    let view = wait_for_terminal(&engine, &job_id).await;

    assert_eq!(view.status, JobStatus::Failed);
    assert_eq!(view.attempts, 1);
    assert_eq!(executor.runs_of("p"), 1);
    assert_eq!(engine.dead_letters(None).await.unwrap()[0].attempts, 1);

    workers.shutdown().await.unwrap();
}

/// L4. Terminal jobs accept no further transitions and hold no queue entry
#[tokio::test]
async fn test_terminal_states_are_final() {
    let executor = Arc::new(Scripted::new("ok"));
    let engine = engine_with(fast_config(), [executor]);
    let workers = engine.start();

    let job_id = engine.submit(job("t", "critical", "ok")).await.unwrap();
    let view = wait_for_terminal(&engine, &job_id).await;
    assert_eq!(view.status, JobStatus::Completed);
    workers.shutdown().await.unwrap();

    for update in [
        StatusUpdate::processing(view.attempts),
        StatusUpdate::failed(view.attempts, "late failure"),
        StatusUpdate::retrying(view.attempts, "late retry"),
    ] {
        let err = engine.store().update_status(&job_id, update).await.unwrap_err();
        assert_eq!(err, QueueError::JobAlreadyTerminal);
    }

    let after = engine.status(&job_id).await.unwrap();
    assert_eq!(after.status, JobStatus::Completed);
    assert_eq!(after.completed_at, view.completed_at);
    assert!(!engine.is_queued(&job_id));
}

/// L5. Claims follow class priority, not submission order
#[tokio::test]
async fn test_dispatch_order_across_classes() {
    let executor = Arc::new(Scripted::new("ordered"));
    let engine = engine_with(fast_config(), [executor.clone()]);

    let normal = engine.submit(job("n", "normal", "ordered")).await.unwrap();
    let critical = engine.submit(job("c", "critical", "ordered")).await.unwrap();
    let high = engine.submit(job("h", "high", "ordered")).await.unwrap();

    let mut events = engine.events();
    let workers = engine.start();

    let mut claimed = Vec::new();
    while claimed.len() < 3 {
        let event = tokio::time::timeout(Duration::from_secs(5), events.next())
            .await
            .expect("timeout waiting for claims")
            .expect("event stream ended");
        if let JobEvent::Claimed { job_id, .. } = event {
            claimed.push(job_id);
        }
    }
    assert_eq!(claimed, vec![critical, high, normal]);

    workers.shutdown().await.unwrap();
}

/// L6. FIFO within one class
#[tokio::test]
async fn test_fifo_within_a_class() {
    let executor = Arc::new(Scripted::new("fifo"));
    let config = fast_config().with_max_concurrency(PerClass::uniform(1));
    let engine = engine_with(config, [executor.clone()]);

    let mut ids = Vec::new();
    for key in ["1", "2", "3", "4"] {
        ids.push(engine.submit(job(key, "high", "fifo")).await.unwrap());
    }

    let workers = engine.start();
    for id in &ids {
        wait_for_terminal(&engine, id).await;
    }
    assert_eq!(*executor.order.lock().unwrap(), vec!["1", "2", "3", "4"]);

    workers.shutdown().await.unwrap();
}

/// L7. Invalid priority leaves no record and no queue entry
#[tokio::test]
async fn test_invalid_priority_is_rejected() {
    let engine = engine_with(fast_config(), [Arc::new(Scripted::new("ok"))]);

    let err = engine.submit(job("u", "urgent", "ok")).await.unwrap_err();
    assert_eq!(err, QueueError::InvalidPriority("urgent".to_string()));

    for status in JobStatus::all() {
        assert!(engine.list_by_status(*status, None).await.unwrap().is_empty());
    }
    assert_eq!(engine.queue_snapshot().totals(), Default::default());
}

/// L8. Completion rate over the dashboard
#[tokio::test]
async fn test_dashboard_completion_rate() {
    let ok = Arc::new(Scripted::new("ok"));
    let bad = Arc::new(Scripted::new("bad").failing(u32::MAX).permanent());
    let engine = engine_with(fast_config(), [ok, bad]);

    let empty = engine.dashboard().await.unwrap();
    assert_eq!(empty.derived.completion_rate, 100.0);
    assert_eq!(empty.derived.throughput, 0);

    let workers = engine.start();
    let mut ids = Vec::new();
    for i in 0..7 {
        ids.push(engine.submit(job(&format!("ok{}", i), "normal", "ok")).await.unwrap());
    }
    for i in 0..3 {
        ids.push(engine.submit(job(&format!("bad{}", i), "high", "bad")).await.unwrap());
    }
    for id in &ids {
        wait_for_terminal(&engine, id).await;
    }

    let dashboard = engine.dashboard().await.unwrap();
    assert_eq!(dashboard.derived.total_completed, 7);
    assert_eq!(dashboard.derived.total_failed, 3);
    assert_eq!(dashboard.derived.throughput, 10);
    assert_eq!(dashboard.derived.completion_rate, 70.0);
    assert_eq!(dashboard.job_stats.completed, 7);
    assert_eq!(dashboard.job_stats.failed, 3);
    assert_eq!(dashboard.system_metrics.overall.throughput, 10);
    assert_eq!(dashboard.system_metrics.by_priority.high.failed, 3);

    let system = engine.system_snapshot(Duration::from_secs(60)).await.unwrap();
    assert_eq!(system.overall.completed, 7);
    assert_eq!(system.overall.failure_rate, 30.0);

    workers.shutdown().await.unwrap();
}

/// L9. Concurrent claims never hand one job to two workers
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_stress_no_duplicate_claims() {
    const N: usize = 300;
    let executor = Arc::new(Scripted::new("stress").slow(Duration::from_millis(1)));
    let engine = engine_with(fast_config(), [executor.clone()]);
    let workers = engine.start();

    let classes = ["critical", "high", "normal"];
    let mut ids = Vec::with_capacity(N);
    for i in 0..N {
        let key = format!("s{}", i);
        ids.push(engine.submit(job(&key, classes[i % 3], "stress")).await.unwrap());
    }
    for id in &ids {
        let view = wait_for_terminal(&engine, id).await;
        assert_eq!(view.status, JobStatus::Completed);
        assert_eq!(view.attempts, 1);
    }

    let runs = executor.runs.lock().unwrap().clone();
    assert_eq!(runs.len(), N);
    assert_eq!(runs.values().sum::<u32>() as usize, N);
    assert!(runs.values().all(|&count| count == 1));
    assert_eq!(engine.queue_snapshot().totals().completed, N as u64);

    workers.shutdown().await.unwrap();
}

/// L10. Per-class concurrency ceiling holds
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrency_ceiling() {
    let executor = Arc::new(Scripted::new("capped").slow(Duration::from_millis(30)));
    let config = fast_config().with_max_concurrency(PerClass::uniform(2));
    let engine = engine_with(config, [executor.clone()]);
    let workers = engine.start();

    let mut ids = Vec::new();
    for i in 0..8 {
        ids.push(engine.submit(job(&format!("c{}", i), "normal", "capped")).await.unwrap());
    }
    for id in &ids {
        wait_for_terminal(&engine, id).await;
    }
    assert!(executor.peak.load(Ordering::SeqCst) <= 2);

    workers.shutdown().await.unwrap();
}

/// L11. Rate limit defers claims instead of dropping them
#[tokio::test]
async fn test_rate_limit_defers_claims() {
    let executor = Arc::new(Scripted::new("paced"));
    let config = fast_config().with_claims_per_second(PerClass::uniform(2));
    let engine = engine_with(config, [executor.clone()]);

    let mut ids = Vec::new();
    for i in 0..4 {
        ids.push(engine.submit(job(&format!("r{}", i), "normal", "paced")).await.unwrap());
    }
    let workers = engine.start();

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(executor.runs.lock().unwrap().len() <= 2);

    for id in &ids {
        assert_eq!(wait_for_terminal(&engine, id).await.status, JobStatus::Completed);
    }

    workers.shutdown().await.unwrap();
}

/// L12. A saturated class does not block lower classes
#[tokio::test]
async fn test_saturated_class_does_not_block_lower_classes() {
    let blocker = Arc::new(Scripted::new("blocker").slow(Duration::from_millis(500)));
    let quick = Arc::new(Scripted::new("quick"));
    let config = fast_config().with_max_concurrency(PerClass {
        critical: 1,
        high: 5,
        normal: 5,
    });
    let engine = engine_with(config, [blocker, quick]);
    let workers = engine.start();

    engine.submit(job("b1", "critical", "blocker")).await.unwrap();
    engine.submit(job("b2", "critical", "blocker")).await.unwrap();
    let normal = engine.submit(job("q", "normal", "quick")).await.unwrap();

    let view = tokio::time::timeout(Duration::from_millis(400), wait_for_terminal(&engine, &normal))
        .await
        .expect("normal work waited on a saturated critical class");
    assert_eq!(view.status, JobStatus::Completed);

    workers.shutdown().await.unwrap();
}

/// L13. Retry delay is waited out before the next claim
#[tokio::test]
async fn test_retry_waits_for_backoff() {
    let executor = Arc::new(Scripted::new("delayed").failing(1));
    let config = fast_config().with_backoff(BackoffSchedule::from_millis(&[200]));
    let engine = engine_with(config, [executor.clone()]);
    let workers = engine.start();

    let job_id = engine.submit(job("d", "normal", "delayed")).await.unwrap();
    assert_eq!(wait_for_terminal(&engine, &job_id).await.status, JobStatus::Completed);

    let history = engine.history(&job_id).await.unwrap();
    let retried_at = history
        .iter()
        .find(|entry| entry.status == JobStatus::Retrying)
        .map(|entry| entry.recorded_at)
        .unwrap();
    let reclaimed_at = history
        .iter()
        .find(|entry| entry.status == JobStatus::Processing && entry.attempt == 2)
        .map(|entry| entry.recorded_at)
        .unwrap();
    assert!((reclaimed_at - retried_at).num_milliseconds() >= 190);

    workers.shutdown().await.unwrap();
}

/// L14. Expired claims are re-executed; the lagging attempt cannot overwrite
#[tokio::test]
async fn test_visibility_timeout_reclaims_lost_work() {
    struct SlowFirst {
        runs: AtomicUsize,
    }

    #[async_trait]
    impl Executor for SlowFirst {
        fn job_type(&self) -> &str {
            "slow-first"
        }

        async fn execute(&self, _payload: Value) -> Result<Value, JobError> {
            let run = self.runs.fetch_add(1, Ordering::SeqCst) + 1;
            if run == 1 {
                tokio::time::sleep(Duration::from_millis(400)).await;
            }
            Ok(json!({ "run": run }))
        }
    }

    let executor = Arc::new(SlowFirst { runs: AtomicUsize::new(0) });
    let config = fast_config().with_visibility_timeout(Duration::from_millis(100));
    let engine = engine_with(config, [executor.clone()]);
    let workers = engine.start();

    let job_id = engine.submit(job("v", "normal", "slow-first")).await.unwrap();
    let view = wait_for_terminal(&engine, &job_id).await;
    assert_eq!(view.status, JobStatus::Completed);
    assert_eq!(view.attempts, 2);
    assert_eq!(view.result, Some(json!({ "run": 2 })));

    // let the first run finish and try to write its stale completion
    tokio::time::sleep(Duration::from_millis(450)).await;
    let after = engine.status(&job_id).await.unwrap();
    assert_eq!(after.attempts, 2);
    assert_eq!(after.result, Some(json!({ "run": 2 })));
    assert_eq!(executor.runs.load(Ordering::SeqCst), 2);

    workers.shutdown().await.unwrap();
}

/// L15. A claim that expires on the final attempt is dead-lettered
#[tokio::test]
async fn test_visibility_timeout_on_final_attempt() {
    let executor = Arc::new(Scripted::new("hang").slow(Duration::from_millis(400)));
    let config = fast_config()
        .with_visibility_timeout(Duration::from_millis(100))
        .with_default_max_attempts(1);
    let engine = engine_with(config, [executor.clone()]);
    let workers = engine.start();

    let job_id = engine.submit(job("h", "high", "hang")).await.unwrap();
    let view = wait_for_terminal(&engine, &job_id).await;
    assert_eq!(view.status, JobStatus::Failed);
    assert_eq!(view.attempts, 1);
    assert_eq!(view.error_message.as_deref(), Some(VISIBILITY_EXHAUSTED));

    let dead = engine.dead_letters(None).await.unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].failure_reason, VISIBILITY_EXHAUSTED);
    assert_eq!(executor.runs_of("h"), 1);

    workers.shutdown().await.unwrap();
}

/// L15b. The superseded attempt of an exhausted job writes no second dead letter
#[tokio::test]
async fn test_late_failure_after_final_reclaim_is_discarded() {
    let executor = Arc::new(
        Scripted::new("hang")
            .failing(1)
            .slow(Duration::from_millis(400)),
    );
    let config = fast_config()
        .with_visibility_timeout(Duration::from_millis(100))
        .with_default_max_attempts(1);
    let engine = engine_with(config, [executor.clone()]);
    let workers = engine.start();

    let job_id = engine.submit(job("late", "high", "hang")).await.unwrap();
    let view = wait_for_terminal(&engine, &job_id).await;
    assert_eq!(view.status, JobStatus::Failed);

    // the first run is still sleeping; let it fail against the failed record
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(executor.runs_of("late"), 1);

    let dead = engine.dead_letters(None).await.unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].failure_reason, VISIBILITY_EXHAUSTED);

    let after = engine.status(&job_id).await.unwrap();
    assert_eq!(after.status, JobStatus::Failed);
    assert_eq!(after.error_message.as_deref(), Some(VISIBILITY_EXHAUSTED));
    assert!(!engine.is_queued(&job_id));

    workers.shutdown().await.unwrap();
}

/// L15c. A reclaimed job that completes is never dead-lettered by the attempt it replaced
#[tokio::test]
async fn test_late_permanent_error_does_not_dead_letter_completed_job() {
    struct SlowThenBroken {
        runs: AtomicUsize,
    }

    #[async_trait]
    impl Executor for SlowThenBroken {
        fn job_type(&self) -> &str {
            "slow-then-broken"
        }

        async fn execute(&self, _payload: Value) -> Result<Value, JobError> {
            let run = self.runs.fetch_add(1, Ordering::SeqCst) + 1;
            if run == 1 {
                tokio::time::sleep(Duration::from_millis(400)).await;
                return Err(JobError::permanent("schema mismatch"));
            }
            Ok(json!({ "run": run }))
        }
    }

    let executor = Arc::new(SlowThenBroken { runs: AtomicUsize::new(0) });
    let config = fast_config().with_visibility_timeout(Duration::from_millis(100));
    let engine = engine_with(config, [executor.clone()]);
    let workers = engine.start();

    let job_id = engine.submit(job("b", "normal", "slow-then-broken")).await.unwrap();
    let view = wait_for_terminal(&engine, &job_id).await;
    assert_eq!(view.status, JobStatus::Completed);

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(executor.runs.load(Ordering::SeqCst), 2);

    let after = engine.status(&job_id).await.unwrap();
    assert_eq!(after.status, JobStatus::Completed);
    assert_eq!(after.attempts, 2);
    assert!(engine.dead_letters(None).await.unwrap().is_empty());

    workers.shutdown().await.unwrap();
}

/// L16. Executor panics and timeouts become failed attempts
#[tokio::test]
async fn test_panics_and_timeouts_are_caught() {
    struct Panicky;

    #[async_trait]
    impl Executor for Panicky {
        fn job_type(&self) -> &str {
            "panicky"
        }

        async fn execute(&self, _payload: Value) -> Result<Value, JobError> {
            panic!("executor bug");
        }
    }

    let hang = Arc::new(Scripted::new("hang").slow(Duration::from_secs(5)));
    let config = fast_config().with_execution_timeout(Duration::from_millis(50));
    let engine = engine_with(config, [Arc::new(Panicky), hang]);
    let workers = engine.start();

    let panicked = engine.submit(job("x", "normal", "panicky")).await.unwrap();
    let timed_out = engine
        .submit(job("y", "normal", "hang").with_max_attempts(1))
        .await
        .unwrap();

    let view = wait_for_terminal(&engine, &panicked).await;
    assert_eq!(view.status, JobStatus::Failed);
    assert_eq!(view.attempts, 3);
    assert!(view.error_message.unwrap().contains("panicked"));

    let view = wait_for_terminal(&engine, &timed_out).await;
    assert_eq!(view.status, JobStatus::Failed);
    assert!(view.error_message.unwrap().contains("timed out"));

    workers.shutdown().await.unwrap();
}

/// L17. Shutdown drains in-flight executions
#[tokio::test]
async fn test_shutdown_drains_in_flight_jobs() {
    let executor = Arc::new(Scripted::new("drain").slow(Duration::from_millis(150)));
    let engine = engine_with(fast_config(), [executor.clone()]);
    let workers = engine.start();

    let job_id = engine.submit(job("z", "normal", "drain")).await.unwrap();
    tokio::time::timeout(Duration::from_secs(2), async {
        while engine.status(&job_id).await.unwrap().status != JobStatus::Processing {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    workers.shutdown().await.unwrap();
    assert_eq!(engine.status(&job_id).await.unwrap().status, JobStatus::Completed);
}

/// M1. Subscribers get an immediate snapshot, then one per interval
#[tokio::test]
async fn test_subscribe_streams_snapshots() {
    let engine = engine_with(fast_config(), [Arc::new(Scripted::new("ok"))]);
    let workers = engine.start();
    engine.submit(job("m", "normal", "ok")).await.unwrap();

    let stream = engine.subscribe();
    assert_eq!(engine.metrics().subscriber_count(), 1);

    let snapshots: Vec<_> = tokio::time::timeout(Duration::from_secs(2), stream.take(3).collect::<Vec<_>>())
        .await
        .expect("stream stalled");
    assert_eq!(engine.metrics().subscriber_count(), 0);

    assert_eq!(snapshots.len(), 3);
    assert!(snapshots
        .iter()
        .all(|snapshot| snapshot.derived.completion_rate == 100.0));

    workers.shutdown().await.unwrap();
}

/// M2. A lagging subscriber is dropped without affecting others
#[tokio::test]
async fn test_lagging_subscriber_is_dropped_independently() {
    let config = fast_config().with_snapshot_capacity(1);
    let engine = engine_with(config, [Arc::new(Scripted::new("ok"))]);
    let workers = engine.start();

    let mut slow = engine.subscribe();
    let mut healthy = engine.subscribe();
    assert!(slow.next().await.is_some());

    let received = Arc::new(AtomicUsize::new(0));
    let counter = received.clone();
    let consumer = tokio::spawn(async move {
        while healthy.next().await.is_some() {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    });

    // several producer ticks pass while `slow` is not polled
    tokio::time::sleep(Duration::from_millis(400)).await;
    let ended = tokio::time::timeout(Duration::from_secs(1), slow.next())
        .await
        .expect("lagging stream neither ended nor yielded");
    assert!(ended.is_none());

    let before = received.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(received.load(Ordering::SeqCst) > before);

    consumer.abort();
    workers.shutdown().await.unwrap();
}
