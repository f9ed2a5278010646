use crate::{
    db::{
        bind::{BindPredicates, BindValues},
        driver::{RowSource, Transaction},
        layout::{LayoutTree, LazyLoadBinding},
        plan::QueryPlan,
    },
    obs::{ObjectGraphNode, ProfilerRef},
};
use std::sync::Arc;

///
/// FetchMode
///
/// Shape of the result a fetch produces. Selected once per request.
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum FetchMode {
    /// At most one entity (find by id / find unique).
    Single,
    List,
    /// Deduplicated by entity identity, first occurrence kept.
    Set,
    /// Keyed by `key_property`, or by identity when `None`.
    Map { key_property: Option<String> },
    /// Streamed through [`QueryIter`](crate::db::QueryIter); no container.
    Iterate,
}

///
/// FetchRequest
///
/// Immutable per-execution descriptor, owned by one materializer for its
/// lifetime.
///

pub struct FetchRequest<L: LayoutTree> {
    pub(crate) plan: Arc<QueryPlan<L>>,
    pub(crate) transaction: Arc<dyn Transaction>,
    pub(crate) predicates: Box<dyn BindPredicates>,
    pub(crate) mode: FetchMode,
    pub(crate) max_rows: u64,
    pub(crate) timeout_secs: u32,
    pub(crate) fetch_size_hint: u32,
    pub(crate) forward_only: bool,
    pub(crate) read_only: bool,
    pub(crate) usage_profiling: bool,
    pub(crate) profiler: Option<ProfilerRef>,
    pub(crate) graph_node: Option<ObjectGraphNode>,
    pub(crate) supplied_cursor: Option<Box<dyn RowSource>>,
    pub(crate) lazy_load: Option<LazyLoadBinding>,
}

impl<L: LayoutTree> FetchRequest<L> {
    #[must_use]
    pub fn new(plan: Arc<QueryPlan<L>>, transaction: Arc<dyn Transaction>) -> Self {
        Self {
            plan,
            transaction,
            predicates: Box::new(BindValues::default()),
            mode: FetchMode::List,
            max_rows: 0,
            timeout_secs: 0,
            fetch_size_hint: 0,
            forward_only: false,
            read_only: false,
            usage_profiling: false,
            profiler: None,
            graph_node: None,
            supplied_cursor: None,
            lazy_load: None,
        }
    }

    #[must_use]
    pub fn with_predicates(mut self, predicates: impl BindPredicates + 'static) -> Self {
        self.predicates = Box::new(predicates);
        self
    }

    #[must_use]
    pub fn with_mode(mut self, mode: FetchMode) -> Self {
        self.mode = mode;
        self
    }

    /// Cap on logical entities; `0` falls back to the global cap.
    #[must_use]
    pub const fn with_max_rows(mut self, max_rows: u64) -> Self {
        self.max_rows = max_rows;
        self
    }

    #[must_use]
    pub const fn with_timeout_secs(mut self, seconds: u32) -> Self {
        self.timeout_secs = seconds;
        self
    }

    #[must_use]
    pub const fn with_fetch_size_hint(mut self, rows: u32) -> Self {
        self.fetch_size_hint = rows;
        self
    }

    #[must_use]
    pub const fn forward_only(mut self) -> Self {
        self.forward_only = true;
        self
    }

    #[must_use]
    pub const fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    #[must_use]
    pub const fn usage_profiling(mut self) -> Self {
        self.usage_profiling = true;
        self
    }

    #[must_use]
    pub fn with_profiler(mut self, profiler: ProfilerRef) -> Self {
        self.profiler = Some(profiler);
        self
    }

    #[must_use]
    pub fn with_graph_node(mut self, node: ObjectGraphNode) -> Self {
        self.graph_node = Some(node);
        self
    }

    /// Use an already-open row source instead of executing the statement.
    #[must_use]
    pub fn with_supplied_cursor(mut self, source: Box<dyn RowSource>) -> Self {
        self.supplied_cursor = Some(source);
        self
    }

    /// Attach each loaded record to its parent's `property` collection.
    #[must_use]
    pub fn with_lazy_load(mut self, binding: LazyLoadBinding) -> Self {
        self.lazy_load = Some(binding);
        self
    }

    #[must_use]
    pub fn plan(&self) -> &Arc<QueryPlan<L>> {
        &self.plan
    }

    #[must_use]
    pub const fn mode(&self) -> &FetchMode {
        &self.mode
    }
}
