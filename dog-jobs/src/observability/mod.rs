pub mod aggregator;
pub mod metrics;

#[cfg(feature = "tracing-basic")]
pub mod tracing;

pub use aggregator::MetricsAggregator;
pub use metrics::{
    completion_rate, ChannelCounts, DashboardSnapshot, DerivedMetrics, JobStats, LatencyStats,
    QueueSnapshot, SystemMetrics, WindowStats,
};

#[cfg(feature = "tracing-basic")]
pub use self::tracing::{init_tracing, LogFormat};
