//! Query plans: statement text plus layout tree, built once per query shape
//! and reused across executions.

mod cache;

use crate::{
    db::{bind::DataBind, driver::DataAccessError, layout::LayoutTree},
    obs::ObjectGraphNode,
    value::Value,
};
use derive_more::{Add, AddAssign};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;

// re-exports
pub use cache::{PlanCache, PlanKey};

///
/// ExecutionTotals
///

#[derive(Add, AddAssign, Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
pub struct ExecutionTotals {
    pub executions: u64,
    pub entities: u64,
    pub micros: u64,
}

///
/// PlanStatistics
///
/// Rolling statistics of every execution of one plan.
///

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct PlanStatistics {
    pub totals: ExecutionTotals,
    pub max_micros: u64,
    pub last_node: Option<ObjectGraphNode>,
}

impl PlanStatistics {
    #[must_use]
    pub const fn avg_micros(&self) -> u64 {
        match self.totals.executions {
            0 => 0,
            n => self.totals.micros / n,
        }
    }
}

///
/// QueryPlan
///

pub struct QueryPlan<L: LayoutTree> {
    key: PlanKey,
    entity: &'static str,
    sql: String,
    tree: Arc<L>,
    raw_sql: bool,
    log_where_sql: String,
    encryption_keys: Vec<Value>,
    statistics: Mutex<PlanStatistics>,
}

impl<L: LayoutTree> QueryPlan<L> {
    pub fn new(entity: &'static str, sql: impl Into<String>, tree: L) -> Self {
        let sql = sql.into();
        let key = PlanKey::for_shape(entity, &sql, &tree.summary());

        Self {
            key,
            entity,
            sql,
            tree: Arc::new(tree),
            raw_sql: false,
            log_where_sql: String::new(),
            encryption_keys: Vec::new(),
            statistics: Mutex::new(PlanStatistics::default()),
        }
    }

    /// Statement text was supplied by the caller rather than generated.
    #[must_use]
    pub const fn with_raw_sql(mut self) -> Self {
        self.raw_sql = true;
        self
    }

    /// Where-clause text used in log output.
    #[must_use]
    pub fn with_log_where_sql(mut self, text: impl Into<String>) -> Self {
        self.log_where_sql = text.into();
        self
    }

    /// Key values bound ahead of the predicates for encrypted properties.
    #[must_use]
    pub fn with_encryption_keys(mut self, keys: Vec<Value>) -> Self {
        self.encryption_keys = keys;
        self
    }

    #[must_use]
    pub const fn key(&self) -> PlanKey {
        self.key
    }

    #[must_use]
    pub const fn entity(&self) -> &'static str {
        self.entity
    }

    #[must_use]
    pub fn sql(&self) -> &str {
        &self.sql
    }

    #[must_use]
    pub fn tree(&self) -> &L {
        &self.tree
    }

    #[must_use]
    pub fn row_number_included(&self) -> bool {
        self.tree.row_number_included()
    }

    #[must_use]
    pub const fn is_raw_sql(&self) -> bool {
        self.raw_sql
    }

    #[must_use]
    pub fn log_where_sql(&self) -> &str {
        &self.log_where_sql
    }

    pub(crate) fn bind_encryption_keys(&self, bind: &mut DataBind<'_>) -> Result<(), DataAccessError> {
        for key in &self.encryption_keys {
            bind.bind(key.clone())?;
        }

        Ok(())
    }

    /// Fold one finished execution into the rolling statistics.
    pub(crate) fn record_execution(
        &self,
        entities: u64,
        micros: u64,
        node: Option<&ObjectGraphNode>,
    ) {
        let mut stats = self.statistics.lock();
        stats.totals += ExecutionTotals {
            executions: 1,
            entities,
            micros,
        };
        stats.max_micros = stats.max_micros.max(micros);
        if let Some(node) = node {
            stats.last_node = Some(node.clone());
        }
    }

    #[must_use]
    pub fn statistics(&self) -> PlanStatistics {
        self.statistics.lock().clone()
    }
}

impl<L: LayoutTree> std::fmt::Debug for QueryPlan<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryPlan")
            .field("key", &self.key)
            .field("entity", &self.entity)
            .field("sql", &self.sql)
            .field("raw_sql", &self.raw_sql)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{DriverLog, MemoryStatement, order_tree};

    #[test]
    fn record_execution_accumulates_totals_and_max() {
        let plan = QueryPlan::new("order", "select 1", order_tree());
        let node = ObjectGraphNode::origin("order:list");

        plan.record_execution(3, 40, None);
        plan.record_execution(5, 100, Some(&node));

        let stats = plan.statistics();
        assert_eq!(
            stats.totals,
            ExecutionTotals {
                executions: 2,
                entities: 8,
                micros: 140,
            }
        );
        assert_eq!(stats.max_micros, 100);
        assert_eq!(stats.avg_micros(), 70);
        assert_eq!(stats.last_node, Some(node));
    }

    #[test]
    fn encryption_keys_bind_in_order() {
        let plan = QueryPlan::new("order", "select 1", order_tree())
            .with_encryption_keys(vec![Value::text("k1"), Value::text("k2")]);
        let log = Arc::new(DriverLog::default());
        let mut statement = MemoryStatement::new(Arc::clone(&log), Vec::new());

        plan.bind_encryption_keys(&mut DataBind::new(&mut statement))
            .expect("keys should bind");

        assert_eq!(
            log.bound(),
            vec![(1, Value::text("k1")), (2, Value::text("k2"))]
        );
    }

    #[test]
    fn raw_sql_plans_keep_their_flags() {
        let plan = QueryPlan::new("order", "select * from orders where id = ?", order_tree())
            .with_raw_sql()
            .with_log_where_sql("id = ?");

        assert!(plan.is_raw_sql());
        assert_eq!(plan.log_where_sql(), "id = ?");
        assert!(!QueryPlan::new("order", "select 1", order_tree()).is_raw_sql());
    }

    #[test]
    fn key_tracks_the_tree_summary() {
        let plan = QueryPlan::new("order", "select 1", order_tree());

        assert_eq!(
            plan.key(),
            PlanKey::for_shape("order", "select 1", &order_tree().summary())
        );
        assert!(!plan.row_number_included());
    }
}
