use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::execution::retry::BackoffSchedule;
use crate::{JobPriority, QueueError, QueueResult};

/// One value per priority class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerClass<T> {
    pub critical: T,
    pub high: T,
    pub normal: T,
}

impl<T: Copy> PerClass<T> {
    /// Same value for every class
    pub fn uniform(value: T) -> Self {
        Self {
            critical: value,
            high: value,
            normal: value,
        }
    }

    pub fn get(&self, priority: JobPriority) -> T {
        match priority {
            JobPriority::Critical => self.critical,
            JobPriority::High => self.high,
            JobPriority::Normal => self.normal,
        }
    }

    pub fn set(&mut self, priority: JobPriority, value: T) {
        match priority {
            JobPriority::Critical => self.critical = value,
            JobPriority::High => self.high = value,
            JobPriority::Normal => self.normal = value,
        }
    }
}

/// Engine configuration, built once at start-up and handed to each component
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Concurrent executions allowed per class
    pub max_concurrency: PerClass<usize>,
    /// Claims per second allowed per class
    pub claims_per_second: PerClass<u32>,
    /// How long a claimed entry stays hidden before it can be reclaimed
    pub visibility_timeout: Duration,
    /// How often expired claims are swept
    pub reaper_interval: Duration,
    /// Upper bound on a single executor run
    pub execution_timeout: Duration,
    /// Delay before each retry, indexed by attempt
    pub backoff: BackoffSchedule,
    /// Applied to submissions that do not set their own
    pub default_max_attempts: u32,
    /// Interval between streamed dashboard snapshots
    pub metrics_interval: Duration,
    /// History window used for streamed snapshots
    pub stream_window: Duration,
    /// History window used by `dashboard()`
    pub dashboard_window: Duration,
    /// Snapshots buffered per stream subscriber before it is dropped
    pub snapshot_capacity: usize,
    /// Buffered lifecycle events per event subscriber
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrency: PerClass::uniform(5),
            claims_per_second: PerClass::uniform(10),
            visibility_timeout: Duration::from_secs(60),
            reaper_interval: Duration::from_secs(1),
            execution_timeout: Duration::from_secs(30),
            backoff: BackoffSchedule::default(),
            default_max_attempts: 3,
            metrics_interval: Duration::from_secs(5),
            stream_window: Duration::from_secs(5 * 60),
            dashboard_window: Duration::from_secs(60 * 60),
            snapshot_capacity: 16,
            event_capacity: 1024,
        }
    }
}

impl EngineConfig {
    /// Load configuration from `DOG_JOBS_*` environment variables
    pub fn from_env() -> QueueResult<Self> {
        Self::from_source(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    ///
    /// Missing keys keep their default. Unparseable values keep their default
    /// and log a warning.
    pub fn from_source<F>(lookup: F) -> QueueResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(n) = parse_var::<usize, _>(&lookup, "DOG_JOBS_MAX_CONCURRENCY") {
            config.max_concurrency = PerClass::uniform(n);
        }
        if let Some(n) = parse_var::<u32, _>(&lookup, "DOG_JOBS_CLAIMS_PER_SECOND") {
            config.claims_per_second = PerClass::uniform(n);
        }
        for priority in JobPriority::all() {
            let class = priority.name().to_uppercase();
            if let Some(n) =
                parse_var::<usize, _>(&lookup, &format!("DOG_JOBS_{}_MAX_CONCURRENCY", class))
            {
                config.max_concurrency.set(*priority, n);
            }
            if let Some(n) =
                parse_var::<u32, _>(&lookup, &format!("DOG_JOBS_{}_CLAIMS_PER_SECOND", class))
            {
                config.claims_per_second.set(*priority, n);
            }
        }

        if let Some(secs) = parse_var(&lookup, "DOG_JOBS_VISIBILITY_TIMEOUT_SECS") {
            config.visibility_timeout = Duration::from_secs(secs);
        }
        if let Some(ms) = parse_var(&lookup, "DOG_JOBS_REAPER_INTERVAL_MS") {
            config.reaper_interval = Duration::from_millis(ms);
        }
        if let Some(secs) = parse_var(&lookup, "DOG_JOBS_EXECUTION_TIMEOUT_SECS") {
            config.execution_timeout = Duration::from_secs(secs);
        }
        if let Some(schedule) = parse_var::<BackoffSchedule, _>(&lookup, "DOG_JOBS_BACKOFF_MS") {
            config.backoff = schedule;
        }
        if let Some(n) = parse_var(&lookup, "DOG_JOBS_MAX_ATTEMPTS") {
            config.default_max_attempts = n;
        }
        if let Some(secs) = parse_var(&lookup, "DOG_JOBS_METRICS_INTERVAL_SECS") {
            config.metrics_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var(&lookup, "DOG_JOBS_STREAM_WINDOW_SECS") {
            config.stream_window = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var(&lookup, "DOG_JOBS_DASHBOARD_WINDOW_SECS") {
            config.dashboard_window = Duration::from_secs(secs);
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> QueueResult<()> {
        for priority in JobPriority::all() {
            if self.max_concurrency.get(*priority) == 0 {
                return Err(QueueError::InvalidConfig(format!(
                    "max_concurrency for {} must be at least 1",
                    priority
                )));
            }
            if self.claims_per_second.get(*priority) == 0 {
                return Err(QueueError::InvalidConfig(format!(
                    "claims_per_second for {} must be at least 1",
                    priority
                )));
            }
        }
        if self.default_max_attempts == 0 {
            return Err(QueueError::InvalidConfig(
                "default_max_attempts must be at least 1".to_string(),
            ));
        }
        if self.visibility_timeout.is_zero() || self.reaper_interval.is_zero() {
            return Err(QueueError::InvalidConfig(
                "visibility_timeout and reaper_interval must be non-zero".to_string(),
            ));
        }
        if self.metrics_interval.is_zero() || self.snapshot_capacity == 0 || self.event_capacity == 0 {
            return Err(QueueError::InvalidConfig(
                "metrics interval and channel capacities must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn with_max_concurrency(mut self, max_concurrency: PerClass<usize>) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    pub fn with_claims_per_second(mut self, claims_per_second: PerClass<u32>) -> Self {
        self.claims_per_second = claims_per_second;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffSchedule) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_visibility_timeout(mut self, timeout: Duration) -> Self {
        self.visibility_timeout = timeout;
        self
    }

    pub fn with_reaper_interval(mut self, interval: Duration) -> Self {
        self.reaper_interval = interval;
        self
    }

    pub fn with_execution_timeout(mut self, timeout: Duration) -> Self {
        self.execution_timeout = timeout;
        self
    }

    pub fn with_metrics_interval(mut self, interval: Duration) -> Self {
        self.metrics_interval = interval;
        self
    }

    pub fn with_default_max_attempts(mut self, max_attempts: u32) -> Self {
        self.default_max_attempts = max_attempts;
        self
    }

    pub fn with_snapshot_capacity(mut self, capacity: usize) -> Self {
        self.snapshot_capacity = capacity;
        self
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Option<T>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(key, value = %raw, "ignoring unparseable config value");
            None
        }
    }
}
