
use crate::{
    config::RuntimeConfig,
    db::{
        BindValues, CursorShape, DataAccessError, Entity, FetchMode, FetchRequest, FetchSize,
        FetchState, LayoutTree, LazyLoadBinding, LoadOutcome, ManyProperty, Materializer,
        NodeSpec, QueryPlan, ReadContext, Record, SqlTree,
    },
    error::{ErrorClass, ErrorOrigin, InternalError},
    obs::{FetchOutcome, MetricsEvent, ObjectGraphNode, ProfilerRef},
    test_support::{
        ExecuteBehaviour, Harness, MemoryPersistence, MemoryRowSource, RecordingProfiler,
        RecordingSink, customer_plan, customer_rows, customer_tree, grouped_rows, order_plan,
        order_row, order_tree,
    },
    value::Value,
};
use std::sync::Arc;

fn materializer(request: FetchRequest<SqlTree>) -> Materializer<SqlTree> {
    Materializer::with_config(request, &RuntimeConfig::default())
}

fn read_list(materializer: &mut Materializer<SqlTree>) -> Vec<Record> {
    materializer
        .read_collection()
        .expect("collection read should succeed")
        .into_list()
}

fn ids(records: &[Record]) -> Vec<Value> {
    records.iter().map(|record| record.identity().clone()).collect()
}

fn line_counts(records: &[Record]) -> Vec<usize> {
    records
        .iter()
        .map(|record| record.many("lines").len())
        .collect()
}
