//! Usage profiling: per-fetch statistics and the optional collector they are
//! reported to.

use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    sync::{Arc, Weak},
};
use thiserror::Error as ThisError;

///
/// ExecutionStatistics
///
/// Produced once per fetch at its terminal transition.
///

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct ExecutionStatistics {
    pub row_count: u64,
    pub entity_count: u64,
    pub elapsed_micros: u64,
    pub cancelled: bool,
}

///
/// ObjectGraphNode
///
/// Position of a fetch inside a larger object graph: the query origin plus
/// the property path that triggered it (`None` for the origin query itself).
///

#[derive(Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct ObjectGraphNode {
    pub origin_key: String,
    pub path: Option<String>,
}

impl ObjectGraphNode {
    #[must_use]
    pub fn origin(origin_key: impl Into<String>) -> Self {
        Self {
            origin_key: origin_key.into(),
            path: None,
        }
    }

    #[must_use]
    pub fn child(&self, path: impl Into<String>) -> Self {
        let path = path.into();
        let path = match &self.path {
            Some(prefix) => format!("{prefix}.{path}"),
            None => path,
        };

        Self {
            origin_key: self.origin_key.clone(),
            path: Some(path),
        }
    }
}

///
/// NodeUsage
///
/// Count of node loads per property path, gathered while usage profiling.
///

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct NodeUsage(BTreeMap<String, u64>);

impl NodeUsage {
    pub fn record(&mut self, path: &str) {
        let count = self.0.entry(path.to_string()).or_insert(0);
        *count = count.saturating_add(1);
    }

    #[must_use]
    pub fn get(&self, path: &str) -> u64 {
        self.0.get(path).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.0.iter().map(|(path, count)| (path.as_str(), *count))
    }
}

///
/// ProfilingError
///

#[derive(Debug, ThisError)]
#[error("profiling collector failed: {message}")]
pub struct ProfilingError {
    pub message: String,
}

impl ProfilingError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

///
/// ProfilingCollector
///
/// Consumer of per-fetch statistics for adaptive query tuning.
///

pub trait ProfilingCollector: Send + Sync {
    fn collect_query_info(
        &self,
        node: Option<&ObjectGraphNode>,
        stats: &ExecutionStatistics,
    ) -> Result<(), ProfilingError>;

    /// Receives node usage when the fetch ran with usage profiling enabled.
    fn collect_node_usage(
        &self,
        _node: Option<&ObjectGraphNode>,
        _usage: &NodeUsage,
    ) -> Result<(), ProfilingError> {
        Ok(())
    }
}

///
/// ProfilerRef
///
/// Non-owning handle to a collector. A fetch never keeps its profiler alive;
/// reporting to a dropped profiler is skipped.
///

#[derive(Clone)]
pub struct ProfilerRef(Weak<dyn ProfilingCollector>);

impl ProfilerRef {
    #[must_use]
    pub fn new<P: ProfilingCollector + 'static>(collector: &Arc<P>) -> Self {
        let collector: Arc<dyn ProfilingCollector> = collector.clone();
        Self(Arc::downgrade(&collector))
    }

    #[must_use]
    pub fn upgrade(&self) -> Option<Arc<dyn ProfilingCollector>> {
        self.0.upgrade()
    }

    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.0.strong_count() > 0
    }
}

impl std::fmt::Debug for ProfilerRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ProfilerRef")
            .field(&if self.is_alive() { "alive" } else { "dropped" })
            .finish()
    }
}
