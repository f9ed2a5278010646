//! Data-access boundary consumed by the materializer.
//!
//! Connections, statements, and row sources are supplied by the host; this
//! module only fixes the contract they satisfy.

use crate::value::Value;
use std::sync::Arc;
use thiserror::Error as ThisError;

///
/// DataAccessError
///
/// Driver-level fault raised while preparing, binding, executing, or
/// advancing a cursor.
///

#[derive(Clone, Debug, Eq, PartialEq, ThisError)]
pub enum DataAccessError {
    #[error("{message}")]
    Driver {
        message: String,
        sql_state: Option<String>,
    },

    #[error("statement cancelled")]
    Cancelled,

    #[error("column {index} out of range ({count} columns)")]
    ColumnOutOfRange { index: usize, count: usize },

    #[error("column {index}: expected {expected}, found {found}")]
    TypeMismatch {
        index: usize,
        expected: &'static str,
        found: &'static str,
    },

    #[error("row source closed")]
    Closed,
}

impl DataAccessError {
    pub fn driver(message: impl Into<String>) -> Self {
        Self::Driver {
            message: message.into(),
            sql_state: None,
        }
    }

    #[must_use]
    pub fn with_sql_state(self, state: impl Into<String>) -> Self {
        match self {
            Self::Driver { message, .. } => Self::Driver {
                message,
                sql_state: Some(state.into()),
            },
            other => other,
        }
    }
}

///
/// RowSource
///
/// Positioned, forward-only row stream. Column indexes are 0-based.
///

pub trait RowSource: Send {
    /// Move to the next row; `false` once the stream is exhausted.
    fn advance(&mut self) -> Result<bool, DataAccessError>;

    /// Value of one column of the current row.
    fn column(&self, index: usize) -> Result<Value, DataAccessError>;

    fn column_count(&self) -> usize;

    fn close(&mut self) -> Result<(), DataAccessError>;
}

///
/// CursorShape
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CursorShape {
    /// Whatever the platform defaults to (scrollable or buffered).
    Default,

    /// Non-scrollable, read-only cursor for large result streaming.
    ForwardOnlyReadOnly,
}

///
/// FetchSize
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FetchSize {
    /// Minimal buffering; rows are streamed from the server one at a time.
    Streaming,
    Rows(u32),
}

///
/// StatementCancel
///
/// The thread-safe part of a statement: the only handle touched from a
/// thread other than the one driving the fetch.
///

pub trait StatementCancel: Send + Sync {
    fn cancel(&self) -> Result<(), DataAccessError>;
}

///
/// PreparedStatement
///

pub trait PreparedStatement: Send {
    fn set_query_timeout(&mut self, seconds: u32) -> Result<(), DataAccessError>;

    fn set_fetch_size(&mut self, size: FetchSize) -> Result<(), DataAccessError>;

    /// Bind one parameter; positions are 1-based.
    fn set_parameter(&mut self, position: usize, value: Value) -> Result<(), DataAccessError>;

    fn canceller(&self) -> Arc<dyn StatementCancel>;

    /// Execute the statement. Blocks until the first rows are available and
    /// must return promptly (usually with `Cancelled`) once the canceller fires.
    fn execute_query(&mut self) -> Result<Box<dyn RowSource>, DataAccessError>;

    fn close(&mut self) -> Result<(), DataAccessError>;
}

///
/// Connection
///

pub trait Connection: Send + Sync {
    fn prepare(
        &self,
        sql: &str,
        shape: CursorShape,
    ) -> Result<Box<dyn PreparedStatement>, DataAccessError>;
}

///
/// Transaction
///
/// Active transaction the fetch runs inside. Owns the connection and the
/// optional summary log that execution faults are written to.
///

pub trait Transaction: Send + Sync {
    fn internal_connection(&self) -> Result<Arc<dyn Connection>, DataAccessError>;

    fn is_log_summary(&self) -> bool;

    fn log_summary(&self, message: &str);
}
