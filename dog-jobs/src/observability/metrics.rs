use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::PerClass;
use crate::{HistoryEntry, JobPriority, JobStatus};

/// Counts for one priority channel
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelCounts {
    /// Claimable now
    pub waiting: u64,
    /// Waiting out a retry delay
    pub delayed: u64,
    /// Claimed and not yet acknowledged
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
}

/// Per-class queue counts
pub type QueueSnapshot = PerClass<ChannelCounts>;

impl PerClass<ChannelCounts> {
    /// Sum across all classes
    pub fn totals(&self) -> ChannelCounts {
        JobPriority::all()
            .iter()
            .map(|priority| self.get(*priority))
            .fold(ChannelCounts::default(), |acc, counts| ChannelCounts {
                waiting: acc.waiting + counts.waiting,
                delayed: acc.delayed + counts.delayed,
                active: acc.active + counts.active,
                completed: acc.completed + counts.completed,
                failed: acc.failed + counts.failed,
            })
    }
}

/// Latency distribution of execution attempts, in milliseconds
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LatencyStats {
    pub avg: f64,
    pub p50: u64,
    pub p95: u64,
    pub p99: u64,
    pub max: u64,
}

impl LatencyStats {
    pub fn from_durations(mut durations: Vec<u64>) -> Self {
        if durations.is_empty() {
            return Self::default();
        }
        durations.sort_unstable();
        let sum: u64 = durations.iter().sum();
        Self {
            avg: round2(sum as f64 / durations.len() as f64),
            p50: percentile(&durations, 50.0),
            p95: percentile(&durations, 95.0),
            p99: percentile(&durations, 99.0),
            max: durations[durations.len() - 1],
        }
    }
}

/// Nearest-rank percentile over sorted values
pub fn percentile(sorted: &[u64], p: f64) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let index = ((p / 100.0) * (sorted.len() - 1) as f64).round() as usize;
    sorted[index.min(sorted.len() - 1)]
}

/// Attempt outcomes within a time window
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowStats {
    /// Attempts that finished (completed, retrying or failed)
    pub attempts: u64,
    pub completed: u64,
    /// Jobs that failed for good
    pub failed: u64,
    /// Attempts that failed and were scheduled for retry
    pub retried: u64,
    /// Terminal outcomes (completed + failed)
    pub throughput: u64,
    /// Terminal outcomes per second over the window
    pub throughput_per_sec: f64,
    /// Percentage of finished attempts that failed
    pub failure_rate: f64,
    pub latency_ms: LatencyStats,
}

impl WindowStats {
    pub fn from_entries<'a, I>(entries: I, window_secs: f64) -> Self
    where
        I: IntoIterator<Item = &'a HistoryEntry>,
    {
        let mut stats = Self::default();
        let mut durations = Vec::new();

        for entry in entries.into_iter().filter(|entry| entry.is_outcome()) {
            stats.attempts += 1;
            match entry.status {
                JobStatus::Completed => stats.completed += 1,
                JobStatus::Failed => stats.failed += 1,
                JobStatus::Retrying => stats.retried += 1,
                _ => {}
            }
            if let Some(duration) = entry.duration_ms {
                durations.push(duration);
            }
        }

        stats.throughput = stats.completed + stats.failed;
        if window_secs > 0.0 {
            stats.throughput_per_sec = round2(stats.throughput as f64 / window_secs);
        }
        if stats.attempts > 0 {
            stats.failure_rate =
                round2((stats.failed + stats.retried) as f64 / stats.attempts as f64 * 100.0);
        }
        stats.latency_ms = LatencyStats::from_durations(durations);
        stats
    }
}

/// Throughput, failure rate and latency computed from history
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemMetrics {
    pub since: DateTime<Utc>,
    pub until: DateTime<Utc>,
    pub overall: WindowStats,
    pub by_priority: PerClass<WindowStats>,
}

impl SystemMetrics {
    /// Aggregate the history entries recorded in `[since, until]`
    pub fn from_history(entries: &[HistoryEntry], since: DateTime<Utc>, until: DateTime<Utc>) -> Self {
        let window_secs = (until - since).num_milliseconds().max(0) as f64 / 1000.0;
        let in_window: Vec<&HistoryEntry> = entries
            .iter()
            .filter(|entry| entry.recorded_at >= since && entry.recorded_at <= until)
            .collect();

        let class_stats = |priority: JobPriority| {
            WindowStats::from_entries(
                in_window.iter().copied().filter(|entry| entry.priority == priority),
                window_secs,
            )
        };

        Self {
            since,
            until,
            overall: WindowStats::from_entries(in_window.iter().copied(), window_secs),
            by_priority: PerClass {
                critical: class_stats(JobPriority::Critical),
                high: class_stats(JobPriority::High),
                normal: class_stats(JobPriority::Normal),
            },
        }
    }
}

/// Number of stored jobs per status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStats {
    pub pending: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
    pub retrying: u64,
    pub total: u64,
}

impl JobStats {
    pub fn record(&mut self, status: JobStatus) {
        match status {
            JobStatus::Pending => self.pending += 1,
            JobStatus::Processing => self.processing += 1,
            JobStatus::Completed => self.completed += 1,
            JobStatus::Failed => self.failed += 1,
            JobStatus::Retrying => self.retrying += 1,
        }
        self.total += 1;
    }
}

/// Dashboard totals derived from the queue snapshot
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DerivedMetrics {
    pub total_active: u64,
    pub total_waiting: u64,
    pub total_completed: u64,
    pub total_failed: u64,
    pub completion_rate: f64,
    pub throughput: u64,
}

impl DerivedMetrics {
    pub fn from_queue(queue: &QueueSnapshot) -> Self {
        let totals = queue.totals();
        Self {
            total_active: totals.active,
            total_waiting: totals.waiting + totals.delayed,
            total_completed: totals.completed,
            total_failed: totals.failed,
            completion_rate: completion_rate(totals.completed, totals.failed),
            throughput: totals.completed + totals.failed,
        }
    }
}

/// `completed / (completed + failed) * 100`, rounded to two decimals, or 100
/// when nothing has finished yet
pub fn completion_rate(completed: u64, failed: u64) -> f64 {
    let total = completed + failed;
    if total == 0 {
        return 100.0;
    }
    round2(completed as f64 / total as f64 * 100.0)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Combined point-in-time view served by `dashboard()` and the stream
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardSnapshot {
    pub timestamp: DateTime<Utc>,
    pub queue_metrics: QueueSnapshot,
    pub job_stats: JobStats,
    pub system_metrics: SystemMetrics,
    pub derived: DerivedMetrics,
}
