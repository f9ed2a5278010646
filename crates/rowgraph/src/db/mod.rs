mod bind;
mod cursor;
mod driver;
mod entity;
mod layout;
mod materialize;
mod plan;
mod request;
mod response;

// re-exports
pub use bind::{BindPredicates, BindValues, DataBind};
pub use cursor::RowCursor;
pub use driver::{
    Connection, CursorShape, DataAccessError, FetchSize, PreparedStatement, RowSource,
    StatementCancel, Transaction,
};
pub use entity::{Entity, Record};
pub use layout::{
    LayoutTree, LazyLoadBinding, LazyLoadState, LoadOutcome, ManyProperty, NodeSpec,
    PersistenceContext, ReadContext, Relation, SqlTree,
};
pub use materialize::{CancelHandle, FetchState, Materializer, QueryIter};
pub use plan::{ExecutionTotals, PlanCache, PlanKey, PlanStatistics, QueryPlan};
pub use request::{FetchMode, FetchRequest};
pub use response::{
    Assembler, ListAssembler, MapAssembler, ResponseError, ResultContainer, SetAssembler,
    SingleAssembler, assembler_for,
};
