//! In-memory driver, persistence context, and profilers for unit tests.

use crate::{
    db::{
        Connection, CursorShape, DataAccessError, FetchRequest, FetchSize, NodeSpec,
        PersistenceContext, PreparedStatement, QueryPlan, Record, RowSource, SqlTree,
        StatementCancel, Transaction,
    },
    obs::{
        ExecutionStatistics, MetricsEvent, MetricsSink, NodeUsage, ObjectGraphNode,
        ProfilingCollector, ProfilingError,
    },
    value::Value,
};
use parking_lot::{Condvar, Mutex};
use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

// ----------------------------------------------------------------------
// Layouts and rows
// ----------------------------------------------------------------------

/// `order(status) >customer(name) *lines(sku, qty)`: seven columns per row.
pub fn order_tree() -> SqlTree {
    SqlTree::new(
        NodeSpec::new("order")
            .property("status")
            .one("customer", NodeSpec::new("customer").property("name"))
            .many(
                "lines",
                NodeSpec::new("line").property("sku").property("qty"),
            ),
    )
    .expect("order tree should build")
}

/// `customer(name)`: no many relationship, two columns per row.
pub fn customer_tree() -> SqlTree {
    SqlTree::new(NodeSpec::new("customer").property("name")).expect("customer tree should build")
}

pub fn order_row(order: i64, line: Option<i64>) -> Vec<Value> {
    let mut row = vec![
        Value::Int(order),
        Value::text(format!("status-{order}")),
        Value::Int(order * 10),
        Value::text(format!("customer-{order}")),
    ];
    match line {
        Some(line) => row.extend([
            Value::Int(line),
            Value::text(format!("sku-{line}")),
            Value::Int(1),
        ]),
        None => row.extend([Value::Null, Value::Null, Value::Null]),
    }

    row
}

/// Contiguous rows for orders `1..=groups.len()`, `groups[i]` lines each.
pub fn grouped_rows(groups: &[usize]) -> Vec<Vec<Value>> {
    let mut rows = Vec::new();
    let mut line = 100;
    for (index, lines) in groups.iter().enumerate() {
        let order = i64::try_from(index).expect("group index fits") + 1;
        for _ in 0..*lines {
            rows.push(order_row(order, Some(line)));
            line += 1;
        }
    }

    rows
}

pub fn customer_rows(count: i64) -> Vec<Vec<Value>> {
    (1..=count)
        .map(|id| vec![Value::Int(id), Value::text(format!("customer-{id}"))])
        .collect()
}

// ----------------------------------------------------------------------
// Row source
// ----------------------------------------------------------------------

#[derive(Default)]
struct RowState {
    rows: Vec<Vec<Value>>,
    current: Option<usize>,
    advances: usize,
    fail_at: Option<(usize, DataAccessError)>,
    close_calls: usize,
}

///
/// MemoryRowSource
/// Clones share one stream, so tests can inspect a source after handing it off.
///

#[derive(Clone, Default)]
pub struct MemoryRowSource {
    state: Arc<Mutex<RowState>>,
}

impl MemoryRowSource {
    pub fn new(rows: Vec<Vec<Value>>) -> Self {
        Self {
            state: Arc::new(Mutex::new(RowState {
                rows,
                ..RowState::default()
            })),
        }
    }

    /// Fail the advance that would move onto row `row` (0-based).
    #[must_use]
    pub fn failing_at(self, row: usize, err: DataAccessError) -> Self {
        self.state.lock().fail_at = Some((row, err));
        self
    }

    pub fn close_calls(&self) -> usize {
        self.state.lock().close_calls
    }

    pub fn rows_advanced(&self) -> usize {
        self.state.lock().advances
    }
}

impl RowSource for MemoryRowSource {
    fn advance(&mut self) -> Result<bool, DataAccessError> {
        let mut state = self.state.lock();
        if state.close_calls > 0 {
            return Err(DataAccessError::Closed);
        }

        let next = state.current.map_or(0, |current| current + 1);
        if let Some((row, err)) = &state.fail_at
            && *row == next
        {
            return Err(err.clone());
        }
        if next >= state.rows.len() {
            state.current = Some(state.rows.len());
            return Ok(false);
        }

        state.current = Some(next);
        state.advances += 1;
        Ok(true)
    }

    fn column(&self, index: usize) -> Result<Value, DataAccessError> {
        let state = self.state.lock();
        let row = state
            .current
            .and_then(|current| state.rows.get(current))
            .ok_or(DataAccessError::Closed)?;

        row.get(index)
            .cloned()
            .ok_or(DataAccessError::ColumnOutOfRange {
                index,
                count: row.len(),
            })
    }

    fn column_count(&self) -> usize {
        let state = self.state.lock();
        state
            .current
            .and_then(|current| state.rows.get(current))
            .or_else(|| state.rows.first())
            .map_or(0, Vec::len)
    }

    fn close(&mut self) -> Result<(), DataAccessError> {
        self.state.lock().close_calls += 1;
        Ok(())
    }
}

// ----------------------------------------------------------------------
// Driver
// ----------------------------------------------------------------------

///
/// DriverLog
/// Everything the in-memory driver was asked to do.
///

#[derive(Default)]
pub struct DriverLog {
    prepares: Mutex<Vec<(String, CursorShape)>>,
    fetch_sizes: Mutex<Vec<FetchSize>>,
    timeouts: Mutex<Vec<u32>>,
    bound: Mutex<Vec<(usize, Value)>>,
    executes: Mutex<usize>,
    cancels: Mutex<usize>,
    statement_closes: Mutex<usize>,
}

impl DriverLog {
    pub fn prepares(&self) -> Vec<(String, CursorShape)> {
        self.prepares.lock().clone()
    }

    pub fn fetch_sizes(&self) -> Vec<FetchSize> {
        self.fetch_sizes.lock().clone()
    }

    pub fn timeouts(&self) -> Vec<u32> {
        self.timeouts.lock().clone()
    }

    pub fn bound(&self) -> Vec<(usize, Value)> {
        self.bound.lock().clone()
    }

    pub fn executes(&self) -> usize {
        *self.executes.lock()
    }

    pub fn cancels(&self) -> usize {
        *self.cancels.lock()
    }

    pub fn statement_closes(&self) -> usize {
        *self.statement_closes.lock()
    }
}

///
/// ExecuteBehaviour
///

#[derive(Clone, Debug, Default)]
pub enum ExecuteBehaviour {
    #[default]
    Rows,
    Fail(DataAccessError),
    /// Block inside `execute_query` until the canceller fires.
    BlockUntilCancelled,
}

///
/// MemoryCanceller
///

#[derive(Default)]
pub struct MemoryCanceller {
    log: Arc<DriverLog>,
    cancelled: Mutex<bool>,
    signal: Condvar,
}

impl MemoryCanceller {
    fn wait(&self) {
        let mut cancelled = self.cancelled.lock();
        while !*cancelled {
            self.signal.wait(&mut cancelled);
        }
    }
}

impl StatementCancel for MemoryCanceller {
    fn cancel(&self) -> Result<(), DataAccessError> {
        *self.log.cancels.lock() += 1;
        *self.cancelled.lock() = true;
        self.signal.notify_all();
        Ok(())
    }
}

///
/// MemoryStatement
///

pub struct MemoryStatement {
    log: Arc<DriverLog>,
    source: MemoryRowSource,
    behaviour: ExecuteBehaviour,
    canceller: Arc<MemoryCanceller>,
}

impl MemoryStatement {
    pub fn new(log: Arc<DriverLog>, rows: Vec<Vec<Value>>) -> Self {
        Self::with_source(log, MemoryRowSource::new(rows), ExecuteBehaviour::Rows)
    }

    fn with_source(log: Arc<DriverLog>, source: MemoryRowSource, behaviour: ExecuteBehaviour) -> Self {
        let canceller = Arc::new(MemoryCanceller {
            log: Arc::clone(&log),
            ..MemoryCanceller::default()
        });

        Self {
            log,
            source,
            behaviour,
            canceller,
        }
    }
}

impl PreparedStatement for MemoryStatement {
    fn set_query_timeout(&mut self, seconds: u32) -> Result<(), DataAccessError> {
        self.log.timeouts.lock().push(seconds);
        Ok(())
    }

    fn set_fetch_size(&mut self, size: FetchSize) -> Result<(), DataAccessError> {
        self.log.fetch_sizes.lock().push(size);
        Ok(())
    }

    fn set_parameter(&mut self, position: usize, value: Value) -> Result<(), DataAccessError> {
        self.log.bound.lock().push((position, value));
        Ok(())
    }

    fn canceller(&self) -> Arc<dyn StatementCancel> {
        self.canceller.clone()
    }

    fn execute_query(&mut self) -> Result<Box<dyn RowSource>, DataAccessError> {
        *self.log.executes.lock() += 1;

        match &self.behaviour {
            ExecuteBehaviour::Rows => Ok(Box::new(self.source.clone())),
            ExecuteBehaviour::Fail(err) => Err(err.clone()),
            ExecuteBehaviour::BlockUntilCancelled => {
                self.canceller.wait();
                Err(DataAccessError::Cancelled)
            }
        }
    }

    fn close(&mut self) -> Result<(), DataAccessError> {
        *self.log.statement_closes.lock() += 1;
        Ok(())
    }
}

///
/// MemoryConnection
///

#[derive(Default)]
pub struct MemoryConnection {
    log: Arc<DriverLog>,
    source: MemoryRowSource,
    behaviour: Mutex<ExecuteBehaviour>,
    prepare_error: Mutex<Option<DataAccessError>>,
}

impl Connection for MemoryConnection {
    fn prepare(
        &self,
        sql: &str,
        shape: CursorShape,
    ) -> Result<Box<dyn PreparedStatement>, DataAccessError> {
        if let Some(err) = self.prepare_error.lock().clone() {
            return Err(err);
        }
        self.log.prepares.lock().push((sql.to_string(), shape));

        Ok(Box::new(MemoryStatement::with_source(
            Arc::clone(&self.log),
            self.source.clone(),
            self.behaviour.lock().clone(),
        )))
    }
}

///
/// MemoryTransaction
///

#[derive(Default)]
pub struct MemoryTransaction {
    connection: Arc<MemoryConnection>,
    log_summary: bool,
    summary: Mutex<Vec<String>>,
}

impl MemoryTransaction {
    pub fn summary(&self) -> Vec<String> {
        self.summary.lock().clone()
    }
}

impl Transaction for MemoryTransaction {
    fn internal_connection(&self) -> Result<Arc<dyn Connection>, DataAccessError> {
        Ok(self.connection.clone())
    }

    fn is_log_summary(&self) -> bool {
        self.log_summary
    }

    fn log_summary(&self, message: &str) {
        self.summary.lock().push(message.to_string());
    }
}

// ----------------------------------------------------------------------
// Harness
// ----------------------------------------------------------------------

///
/// Harness
/// One in-memory transaction serving rows from a shared source.
///

pub struct Harness {
    pub log: Arc<DriverLog>,
    pub source: MemoryRowSource,
    pub transaction: Arc<MemoryTransaction>,
}

impl Harness {
    pub fn new(rows: Vec<Vec<Value>>) -> Self {
        Self::build(MemoryRowSource::new(rows), ExecuteBehaviour::Rows, None, false)
    }

    pub fn with_source(source: MemoryRowSource) -> Self {
        Self::build(source, ExecuteBehaviour::Rows, None, false)
    }

    pub fn executing(behaviour: ExecuteBehaviour) -> Self {
        Self::build(MemoryRowSource::default(), behaviour, None, true)
    }

    pub fn failing_prepare(err: DataAccessError) -> Self {
        Self::build(MemoryRowSource::default(), ExecuteBehaviour::Rows, Some(err), true)
    }

    fn build(
        source: MemoryRowSource,
        behaviour: ExecuteBehaviour,
        prepare_error: Option<DataAccessError>,
        log_summary: bool,
    ) -> Self {
        let log = Arc::new(DriverLog::default());
        let connection = Arc::new(MemoryConnection {
            log: Arc::clone(&log),
            source: source.clone(),
            behaviour: Mutex::new(behaviour),
            prepare_error: Mutex::new(prepare_error),
        });
        let transaction = Arc::new(MemoryTransaction {
            connection,
            log_summary,
            summary: Mutex::new(Vec::new()),
        });

        Self {
            log,
            source,
            transaction,
        }
    }

    pub fn request(&self, plan: &Arc<QueryPlan<SqlTree>>) -> FetchRequest<SqlTree> {
        FetchRequest::new(Arc::clone(plan), self.transaction.clone())
    }
}

pub fn order_plan() -> Arc<QueryPlan<SqlTree>> {
    Arc::new(QueryPlan::new(
        "order",
        "select o.id, o.status, c.id, c.name, l.id, l.sku, l.qty from orders o order by o.id",
        order_tree(),
    ))
}

pub fn customer_plan() -> Arc<QueryPlan<SqlTree>> {
    Arc::new(QueryPlan::new(
        "customer",
        "select c.id, c.name from customers c",
        customer_tree(),
    ))
}

// ----------------------------------------------------------------------
// Persistence context
// ----------------------------------------------------------------------

///
/// MemoryPersistence
///

#[derive(Default)]
pub struct MemoryPersistence {
    parents: BTreeSet<(String, Value)>,
    children: Mutex<BTreeMap<(String, Value, String), Vec<Record>>>,
    lookups: Mutex<usize>,
}

impl MemoryPersistence {
    pub fn with_parents(entity: &str, ids: impl IntoIterator<Item = i64>) -> Self {
        Self {
            parents: ids
                .into_iter()
                .map(|id| (entity.to_string(), Value::Int(id)))
                .collect(),
            ..Self::default()
        }
    }

    pub fn children(&self, entity: &str, id: &Value, property: &str) -> usize {
        self.children
            .lock()
            .get(&(entity.to_string(), id.clone(), property.to_string()))
            .map_or(0, Vec::len)
    }

    pub fn attached(&self, entity: &str, id: &Value, property: &str) -> Vec<Record> {
        self.children
            .lock()
            .get(&(entity.to_string(), id.clone(), property.to_string()))
            .cloned()
            .unwrap_or_default()
    }

    pub fn lookups(&self) -> usize {
        *self.lookups.lock()
    }
}

impl PersistenceContext for MemoryPersistence {
    fn contains(&self, entity: &str, id: &Value) -> bool {
        *self.lookups.lock() += 1;
        self.parents.contains(&(entity.to_string(), id.clone()))
    }

    fn add_to_collection(&self, entity: &str, id: &Value, property: &str, child: &Record) {
        self.children
            .lock()
            .entry((entity.to_string(), id.clone(), property.to_string()))
            .or_default()
            .push(child.clone());
    }
}

// ----------------------------------------------------------------------
// Observability
// ----------------------------------------------------------------------

///
/// RecordingProfiler
///

#[derive(Default)]
pub struct RecordingProfiler {
    pub fail: bool,
    queries: Mutex<Vec<(Option<ObjectGraphNode>, ExecutionStatistics)>>,
    usage: Mutex<Vec<NodeUsage>>,
}

impl RecordingProfiler {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn queries(&self) -> Vec<(Option<ObjectGraphNode>, ExecutionStatistics)> {
        self.queries.lock().clone()
    }

    pub fn usage(&self) -> Vec<NodeUsage> {
        self.usage.lock().clone()
    }
}

impl ProfilingCollector for RecordingProfiler {
    fn collect_query_info(
        &self,
        node: Option<&ObjectGraphNode>,
        stats: &ExecutionStatistics,
    ) -> Result<(), ProfilingError> {
        self.queries.lock().push((node.cloned(), *stats));
        if self.fail {
            return Err(ProfilingError::new("collector offline"));
        }
        Ok(())
    }

    fn collect_node_usage(
        &self,
        _node: Option<&ObjectGraphNode>,
        usage: &NodeUsage,
    ) -> Result<(), ProfilingError> {
        self.usage.lock().push(usage.clone());
        Ok(())
    }
}

///
/// RecordingSink
///

#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<MetricsEvent>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<MetricsEvent> {
        self.events.lock().clone()
    }
}

impl MetricsSink for RecordingSink {
    fn record(&self, event: MetricsEvent) {
        self.events.lock().push(event);
    }
}
