//! Observability: fetch statistics, profiling collectors, and the metrics
//! sink boundary.

pub(crate) mod metrics;
pub(crate) mod profile;
pub(crate) mod sink;

// re-exports
pub use metrics::{EntitySummary, EventReport, EventState};
pub use profile::{
    ExecutionStatistics, NodeUsage, ObjectGraphNode, ProfilerRef, ProfilingCollector,
    ProfilingError,
};
pub use sink::{
    FetchOutcome, MetricsEvent, MetricsSink, metrics_report, metrics_reset_all, with_metrics_sink,
};
