//! Streaming materialization of joined result rows into grouped entity
//! graphs: layout trees, the grouping materializer, result assemblers, and
//! the iteration façade, behind a small driver boundary.

// public exports are one module level down
pub mod config;
pub mod db;
pub mod error;
pub mod obs;
pub mod value;

// test
#[cfg(test)]
pub(crate) mod test_support;

///
/// Prelude
///
/// Prelude contains only domain vocabulary.
/// No errors, drivers, or observability hooks are re-exported here.
///

pub mod prelude {
    pub use crate::{
        db::{Entity, FetchMode, LayoutTree, NodeSpec, Record, SqlTree},
        value::Value,
    };
}
