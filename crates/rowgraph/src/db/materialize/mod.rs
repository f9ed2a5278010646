//! Materializer: drives the row cursor through a layout tree and groups
//! consecutive rows of the same master identity into logical entities.
//!
//! One materializer serves exactly one fetch. It is driven from a single
//! thread; only its [`CancelHandle`] crosses threads.

mod cancel;
mod iter;

#[cfg(test)]
mod tests;

use crate::{
    config::RuntimeConfig,
    db::{
        bind::DataBind,
        cursor::RowCursor,
        driver::{CursorShape, FetchSize, PreparedStatement},
        entity::Entity,
        layout::{LayoutTree, LazyLoadState, LoadOutcome, ReadContext},
        request::FetchRequest,
        response::{ResultContainer, assembler_for},
    },
    error::{ErrorOrigin, InternalError},
    obs::{
        ExecutionStatistics, FetchOutcome, MetricsEvent, NodeUsage, ProfilerRef,
        sink::record as record_metric,
    },
};
use std::{fmt, time::Instant};

// re-exports
pub use cancel::CancelHandle;
pub use iter::QueryIter;

use cancel::CancelGuard;

///
/// FetchState
///
/// `Idle → Executing → {Draining, Cancelled, Failed} → Closed`
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FetchState {
    Idle,
    /// Statement executed (or cursor supplied); rows are being pulled.
    Executing,
    /// Input exhausted or entity cap reached.
    Draining,
    Cancelled,
    Failed,
    Closed,
}

impl fmt::Display for FetchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Idle => "idle",
            Self::Executing => "executing",
            Self::Draining => "draining",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
            Self::Closed => "closed",
        };
        write!(f, "{label}")
    }
}

///
/// Materializer
///
/// Per-fetch cursor state: row and entity counters, the entity read but not
/// yet confirmed complete (`pending`), and the entity confirmed complete but
/// not yet handed out (`ready`). At most one row is in flight at a time.
///

pub struct Materializer<L: LayoutTree> {
    request: FetchRequest<L>,
    cap: u64,
    state: FetchState,
    cancel: CancelHandle,

    statement: Option<Box<dyn PreparedStatement>>,
    cursor: Option<RowCursor>,
    bind_trace: String,

    row_count: u64,
    entity_count: u64,
    no_more_rows: bool,
    pending: Option<L::Entity>,
    ready: Option<L::Entity>,

    started: Option<Instant>,
    reported: Option<ExecutionStatistics>,
    usage: Option<NodeUsage>,
    lazy: Option<LazyLoadState>,
    container_taken: bool,
}

impl<L: LayoutTree> Materializer<L> {
    /// Materializer using the process-wide runtime config.
    #[must_use]
    pub fn new(request: FetchRequest<L>) -> Self {
        Self::with_config(request, RuntimeConfig::global())
    }

    #[must_use]
    pub fn with_config(request: FetchRequest<L>, config: &RuntimeConfig) -> Self {
        let cap = match request.max_rows {
            0 => config.global_row_limit,
            max_rows => max_rows,
        };
        let usage = request.usage_profiling.then(NodeUsage::default);
        let lazy = request.lazy_load.clone().map(LazyLoadState::new);

        Self {
            request,
            cap,
            state: FetchState::Idle,
            cancel: CancelHandle::new(),
            statement: None,
            cursor: None,
            bind_trace: String::new(),
            row_count: 0,
            entity_count: 0,
            no_more_rows: false,
            pending: None,
            ready: None,
            started: None,
            reported: None,
            usage,
            lazy,
            container_taken: false,
        }
    }

    // ------------------------------------------------------------------
    // Execution
    // ------------------------------------------------------------------

    /// Execute with the request's own forward-only hint.
    pub fn execute(&mut self) -> Result<bool, InternalError> {
        self.prepare_and_execute(self.request.forward_only)
    }

    /// Prepare, bind, and execute the statement (or adopt the supplied
    /// cursor). Returns `false` when the fetch was cancelled before or
    /// during execution; no statement is prepared if the cancel came first.
    pub fn prepare_and_execute(&mut self, forward_only_hint: bool) -> Result<bool, InternalError> {
        if self.state != FetchState::Idle {
            return Err(InternalError::materializer_invariant(format!(
                "cannot execute a fetch that is already {}",
                self.state
            )));
        }

        let cancel = self.cancel.clone();
        {
            let mut guard = cancel.lock();
            if guard.is_cancelled() {
                self.state = FetchState::Cancelled;
                log::debug!(
                    "fetch {} cancelled before execution",
                    self.request.plan.entity()
                );
                return Ok(false);
            }

            self.begin();

            if let Some(source) = self.request.supplied_cursor.take() {
                self.cursor = Some(RowCursor::new(source));
                self.bind_trace.clear();
                return Ok(true);
            }

            if let Err(err) = self.prepare_and_bind(&mut guard, forward_only_hint) {
                drop(guard);
                return Err(self.fail(err));
            }
        }

        // Executed outside the lock so a concurrent cancel reaches the driver.
        let executed = match self.statement.as_deref_mut() {
            Some(statement) => statement.execute_query(),
            None => {
                let err = InternalError::materializer_invariant("statement missing after prepare");
                return Err(self.fail(err));
            }
        };

        match executed {
            Ok(source) => {
                self.cursor = Some(RowCursor::new(source));
                Ok(true)
            }
            Err(err) if self.cancel.is_cancelled() => {
                log::debug!(
                    "fetch {} cancelled during execution: {err}",
                    self.request.plan.entity()
                );
                self.finish(FetchState::Cancelled, FetchOutcome::Cancelled);
                Ok(false)
            }
            Err(err) => Err(self.fail(InternalError::execution(ErrorOrigin::Statement, err))),
        }
    }

    fn begin(&mut self) {
        self.started = Some(Instant::now());
        self.state = FetchState::Executing;
        record_metric(MetricsEvent::FetchStart {
            entity: self.request.plan.entity(),
        });
    }

    fn prepare_and_bind(
        &mut self,
        guard: &mut CancelGuard<'_>,
        forward_only: bool,
    ) -> Result<(), InternalError> {
        let statement_fault = |err| InternalError::execution(ErrorOrigin::Statement, err);
        let plan = &self.request.plan;

        let connection = self
            .request
            .transaction
            .internal_connection()
            .map_err(statement_fault)?;
        let shape = if forward_only {
            CursorShape::ForwardOnlyReadOnly
        } else {
            CursorShape::Default
        };
        let prepared = connection.prepare(plan.sql(), shape).map_err(statement_fault)?;

        guard.register(prepared.canceller());
        let statement = self.statement.insert(prepared);

        if forward_only {
            statement
                .set_fetch_size(FetchSize::Streaming)
                .map_err(statement_fault)?;
        }
        if self.request.timeout_secs > 0 {
            statement
                .set_query_timeout(self.request.timeout_secs)
                .map_err(statement_fault)?;
        }
        if self.request.fetch_size_hint > 0 {
            statement
                .set_fetch_size(FetchSize::Rows(self.request.fetch_size_hint))
                .map_err(statement_fault)?;
        }

        let bind_fault = |err| InternalError::execution(ErrorOrigin::Bind, err);
        let mut bind = DataBind::new(&mut **statement);
        plan.bind_encryption_keys(&mut bind).map_err(bind_fault)?;
        self.bind_trace = self.request.predicates.bind(&mut bind).map_err(bind_fault)?;

        Ok(())
    }

    // ------------------------------------------------------------------
    // Grouping
    // ------------------------------------------------------------------

    /// Whether another logical entity is available. Executes the fetch first
    /// if it has not run yet.
    ///
    /// Each `true` leaves exactly one fully grouped entity ready, with all
    /// rows of its many collection already consumed.
    pub fn has_next(&mut self) -> Result<bool, InternalError> {
        if self.state != FetchState::Idle && self.cancel.is_cancelled() {
            self.stop_cancelled();
            return Ok(false);
        }
        if self.ready.is_some() {
            return Ok(true);
        }

        match self.state {
            FetchState::Idle => {
                if !self.execute()? {
                    return Ok(false);
                }
            }
            FetchState::Executing => {}
            _ => return Ok(false),
        }

        if self.cancel.is_cancelled() {
            self.stop_cancelled();
            return Ok(false);
        }
        if self.no_more_rows || self.entity_count >= self.cap {
            self.finish(FetchState::Draining, FetchOutcome::Completed);
            return Ok(false);
        }

        match self.read_next_entity() {
            Ok(Some(entity)) => {
                self.entity_count += 1;
                self.ready = Some(entity);
                Ok(true)
            }
            Ok(None) => {
                self.finish(FetchState::Draining, FetchOutcome::Completed);
                Ok(false)
            }
            Err(err) if self.cancel.is_cancelled() => {
                log::debug!(
                    "fetch {} cancelled while reading: {err}",
                    self.request.plan.entity()
                );
                self.finish(FetchState::Cancelled, FetchOutcome::Cancelled);
                Ok(false)
            }
            Err(err) => Err(self.fail(err)),
        }
    }

    /// Take the next logical entity, marking it read-only when requested.
    pub fn next_entity(&mut self) -> Result<Option<L::Entity>, InternalError> {
        if !self.has_next()? {
            return Ok(None);
        }
        let Some(mut entity) = self.ready.take() else {
            return Ok(None);
        };

        if self.request.read_only {
            entity.set_read_only();
        }
        if let Err(err) = self.request.plan.tree().complete(&entity, self.lazy.as_mut()) {
            return Err(self.fail(err));
        }

        Ok(Some(entity))
    }

    /// Cancellation observed: an entity grouped but not yet handed out is
    /// dropped and no longer counted.
    fn stop_cancelled(&mut self) {
        if self.ready.take().is_some() {
            self.entity_count -= 1;
        }
        if self.state == FetchState::Executing {
            log::debug!(
                "fetch {} cancelled after {} rows",
                self.request.plan.entity(),
                self.row_count
            );
            self.finish(FetchState::Cancelled, FetchOutcome::Cancelled);
        }
    }

    /// Drop `count` entities that were read ahead but never handed out,
    /// then settle the cancelled fetch. Statistics already reported at
    /// completion are left as they are.
    pub(crate) fn discard_read_ahead(&mut self, count: usize) {
        if self.state == FetchState::Executing {
            let count = u64::try_from(count).unwrap_or(u64::MAX);
            self.entity_count = self.entity_count.saturating_sub(count);
        }
        self.stop_cancelled();
    }

    /// Read rows until one logical entity is complete.
    ///
    /// Without a many relationship every row is one entity. With one, rows
    /// are grouped while the tree reports `Continued`; the pending entity is
    /// released when a row starts a new identity or input runs out.
    fn read_next_entity(&mut self) -> Result<Option<L::Entity>, InternalError> {
        let tree = self.request.plan.tree();
        let grouping = tree.many_property().is_some();
        let row_number = tree.row_number_included();

        let Some(cursor) = self.cursor.as_mut() else {
            return Err(InternalError::materializer_invariant(
                "row cursor missing while executing",
            ));
        };

        loop {
            if !cursor.next_row()? {
                self.no_more_rows = true;
                return Ok(self.pending.take());
            }

            self.row_count += 1;
            cursor.reset_column_position();
            if row_number {
                cursor.increment_position(1);
            }

            let mut ctx = ReadContext::new(cursor, self.usage.as_mut(), self.lazy.as_mut());
            match tree.load(&mut ctx, self.pending.as_mut())? {
                LoadOutcome::Started(entity) if !grouping => return Ok(Some(entity)),
                LoadOutcome::Started(entity) => {
                    if let Some(complete) = self.pending.replace(entity) {
                        return Ok(Some(complete));
                    }
                }
                LoadOutcome::Continued if self.pending.is_none() => {
                    return Err(InternalError::materializer_invariant(format!(
                        "layout continued an entity of {} that was never started",
                        self.request.plan.entity()
                    )));
                }
                LoadOutcome::Continued => {}
            }
        }
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Find-by-id style read: at most one grouping step, then statistics and
    /// close.
    pub fn read_single(&mut self) -> Result<Option<L::Entity>, InternalError> {
        let entity = self.next_entity()?;
        if self.state == FetchState::Executing {
            self.finish(FetchState::Draining, FetchOutcome::Completed);
        }
        self.close();

        Ok(entity)
    }

    /// Bulk read into the request's container. The container is returned
    /// once; a second call is an error.
    pub fn read_collection(&mut self) -> Result<ResultContainer<L::Entity>, InternalError>
    where
        L::Entity: 'static,
    {
        if self.container_taken {
            return Err(InternalError::materializer_invariant(
                "result container was already returned",
            ));
        }
        let Some(mut assembler) = assembler_for::<L::Entity>(&self.request.mode) else {
            return Err(InternalError::materializer_unsupported(
                "iterate fetches have no result container; use read_iterate",
            ));
        };

        self.container_taken = true;
        let mut container = assembler.create_empty();
        while let Some(entity) = self.next_entity()? {
            if let Err(err) = assembler.append(&mut container, entity) {
                self.finish(FetchState::Failed, FetchOutcome::Failed);
                self.close();
                return Err(err);
            }
        }
        self.close();

        Ok(container)
    }

    /// Stream entities through a [`QueryIter`]; buffered when
    /// `buffer_size > 0`.
    #[must_use]
    pub fn read_iterate(self, buffer_size: usize) -> QueryIter<L> {
        QueryIter::new(self, buffer_size)
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    pub fn cancel(&self) -> Result<(), InternalError> {
        self.cancel.cancel()
    }

    #[must_use]
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Release the cursor, then the statement. Idempotent and best-effort:
    /// release faults are logged, never returned. Reports statistics for a
    /// fetch abandoned before its terminal transition.
    pub fn close(&mut self) {
        if self.state == FetchState::Closed {
            return;
        }

        if self.state == FetchState::Executing {
            let outcome = if self.cancel.is_cancelled() {
                FetchOutcome::Cancelled
            } else {
                FetchOutcome::Completed
            };
            self.report_statistics(outcome);
        }

        if let Some(mut cursor) = self.cursor.take()
            && let Err(err) = cursor.close()
        {
            log::error!(
                "error closing cursor of {} fetch: {err}",
                self.request.plan.entity()
            );
        }

        self.cancel.unregister();
        if let Some(mut statement) = self.statement.take()
            && let Err(err) = statement.close()
        {
            log::error!(
                "error closing statement of {} fetch: {err}",
                self.request.plan.entity()
            );
        }

        self.pending = None;
        self.state = FetchState::Closed;
    }

    /// Record a terminal transition.
    fn finish(&mut self, state: FetchState, outcome: FetchOutcome) {
        self.state = state;
        self.report_statistics(outcome);
    }

    /// Terminal failure: attach diagnostics to execution faults and write
    /// them to the transaction summary log.
    fn fail(&mut self, err: InternalError) -> InternalError {
        let err = err.with_execution_context(self.request.plan.sql(), &self.bind_trace);

        if let Some(fault) = err.execution_fault() {
            let transaction = &self.request.transaction;
            if transaction.is_log_summary() {
                let message = fault.source.to_string().replace(['\r', '\n'], "\\n ");
                transaction.log_summary(&format!(
                    "ERROR executing query: bindLog[{}] error[{message}]",
                    fault.bind_trace
                ));
            }
        }

        self.finish(FetchState::Failed, FetchOutcome::Failed);
        err
    }

    // ------------------------------------------------------------------
    // Statistics
    // ------------------------------------------------------------------

    fn elapsed_micros(&self) -> u64 {
        self.started.map_or(0, |started| {
            u64::try_from(started.elapsed().as_micros()).unwrap_or(u64::MAX)
        })
    }

    /// Report once to the metrics sink, the plan, and the profiler (if it
    /// is still alive). Fetches that never started report nothing.
    fn report_statistics(&mut self, outcome: FetchOutcome) {
        if self.reported.is_some() || self.started.is_none() {
            return;
        }

        let stats = ExecutionStatistics {
            row_count: self.row_count,
            entity_count: self.entity_count,
            elapsed_micros: self.elapsed_micros(),
            cancelled: outcome == FetchOutcome::Cancelled,
        };
        self.reported = Some(stats);

        let plan = &self.request.plan;
        let node = self.request.graph_node.as_ref();

        record_metric(MetricsEvent::FetchFinish {
            entity: plan.entity(),
            outcome,
            rows_read: stats.row_count,
            entities_loaded: stats.entity_count,
            elapsed_micros: stats.elapsed_micros,
        });
        plan.record_execution(stats.entity_count, stats.elapsed_micros, node);

        if let Some(profiler) = self.request.profiler.as_ref().and_then(ProfilerRef::upgrade) {
            if let Err(err) = profiler.collect_query_info(node, &stats) {
                log::error!("error updating execution statistics of {}: {err}", plan.entity());
            }
            if let Some(usage) = &self.usage
                && let Err(err) = profiler.collect_node_usage(node, usage)
            {
                log::error!("error reporting node usage of {}: {err}", plan.entity());
            }
        }

        log::debug!(
            "fetch {} {outcome:?}: loaded {} in {}us",
            plan.entity(),
            self.loaded_row_detail(),
            stats.elapsed_micros
        );
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    /// Reported statistics once terminal, otherwise a live snapshot.
    #[must_use]
    pub fn execution_statistics(&self) -> ExecutionStatistics {
        self.reported.unwrap_or_else(|| ExecutionStatistics {
            row_count: self.row_count,
            entity_count: self.entity_count,
            elapsed_micros: self.elapsed_micros(),
            cancelled: self.cancel.is_cancelled(),
        })
    }

    #[must_use]
    pub fn generated_sql(&self) -> &str {
        self.request.plan.sql()
    }

    /// Bound predicate values; empty for supplied cursors.
    #[must_use]
    pub fn bind_trace(&self) -> &str {
        &self.bind_trace
    }

    /// `"rows"`, or `"entities:rows"` when a many relationship multiplies rows.
    #[must_use]
    pub fn loaded_row_detail(&self) -> String {
        if self.request.plan.tree().many_property().is_some() {
            format!("{}:{}", self.entity_count, self.row_count)
        } else {
            self.row_count.to_string()
        }
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    #[must_use]
    pub const fn state(&self) -> FetchState {
        self.state
    }

    #[must_use]
    pub const fn node_usage(&self) -> Option<&NodeUsage> {
        self.usage.as_ref()
    }

    #[must_use]
    pub const fn request(&self) -> &FetchRequest<L> {
        &self.request
    }
}

impl<L: LayoutTree> Drop for Materializer<L> {
    fn drop(&mut self) {
        self.close();
    }
}
