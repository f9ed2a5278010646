use crate::db::{DataAccessError, ResponseError};
use std::fmt;
use thiserror::Error as ThisError;

///
/// InternalError
///
/// Structured runtime error with a stable internal classification.
/// Execution faults carry an [`ExecutionFault`] detail once the
/// materializer has attached the statement text and bind trace.
///

#[derive(Debug, ThisError)]
#[error("{message}")]
pub struct InternalError {
    pub class: ErrorClass,
    pub origin: ErrorOrigin,
    pub message: String,

    /// Optional structured error detail.
    pub detail: Option<ErrorDetail>,
}

impl InternalError {
    pub fn new(class: ErrorClass, origin: ErrorOrigin, message: impl Into<String>) -> Self {
        Self {
            class,
            origin,
            message: message.into(),
            detail: None,
        }
    }

    /// Construct a driver-level execution fault with no diagnostic context yet.
    pub(crate) fn execution(origin: ErrorOrigin, source: DataAccessError) -> Self {
        Self {
            class: ErrorClass::Execution,
            origin,
            message: source.to_string(),
            detail: Some(ErrorDetail::Driver(source)),
        }
    }

    /// Construct a layout-origin invariant violation.
    pub(crate) fn layout_invariant(message: impl Into<String>) -> Self {
        Self::new(
            ErrorClass::InvariantViolation,
            ErrorOrigin::Layout,
            message.into(),
        )
    }

    /// Construct a layout-origin unsupported-shape error.
    pub(crate) fn layout_unsupported(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Unsupported, ErrorOrigin::Layout, message.into())
    }

    /// Construct a materializer-origin invariant violation.
    pub(crate) fn materializer_invariant(message: impl Into<String>) -> Self {
        Self::new(
            ErrorClass::InvariantViolation,
            ErrorOrigin::Materializer,
            message.into(),
        )
    }

    /// Construct a materializer-origin unsupported error.
    pub(crate) fn materializer_unsupported(message: impl Into<String>) -> Self {
        Self::new(
            ErrorClass::Unsupported,
            ErrorOrigin::Materializer,
            message.into(),
        )
    }

    #[must_use]
    pub const fn is_execution_fault(&self) -> bool {
        matches!(self.class, ErrorClass::Execution)
    }

    /// Diagnostic context attached to an execution fault, if any.
    #[must_use]
    pub const fn execution_fault(&self) -> Option<&ExecutionFault> {
        match &self.detail {
            Some(ErrorDetail::Execution(fault)) => Some(fault),
            _ => None,
        }
    }

    /// Attach the generated statement text and bind trace to an execution
    /// fault. Errors of any other class pass through untouched.
    #[must_use]
    pub(crate) fn with_execution_context(mut self, sql: &str, bind_trace: &str) -> Self {
        if self.class != ErrorClass::Execution {
            return self;
        }

        let source = match self.detail.take() {
            Some(ErrorDetail::Driver(source)) => source,
            Some(other) => {
                self.detail = Some(other);
                return self;
            }
            None => DataAccessError::driver(self.message.clone()),
        };

        self.message = format!("query failed: {source}; bind[{bind_trace}] sql[{sql}]");
        self.detail = Some(ErrorDetail::Execution(ExecutionFault {
            sql: sql.to_string(),
            bind_trace: bind_trace.to_string(),
            source,
        }));

        self
    }
}

impl From<DataAccessError> for InternalError {
    fn from(err: DataAccessError) -> Self {
        Self::execution(ErrorOrigin::Cursor, err)
    }
}

impl From<ResponseError> for InternalError {
    fn from(err: ResponseError) -> Self {
        Self::new(err.class(), ErrorOrigin::Response, err.to_string())
    }
}

///
/// ErrorDetail
///
/// Structured, origin-specific error detail carried by [`InternalError`].
///

#[derive(Debug, ThisError)]
pub enum ErrorDetail {
    /// Raw driver fault, before the materializer attaches its context.
    #[error("{0}")]
    Driver(DataAccessError),

    #[error("{0}")]
    Execution(ExecutionFault),
}

///
/// ExecutionFault
///
/// Driver fault plus the statement text and bind trace that produced it.
///

#[derive(Debug, ThisError)]
#[error("{source} (bind[{bind_trace}] sql[{sql}])")]
pub struct ExecutionFault {
    pub sql: String,
    pub bind_trace: String,
    #[source]
    pub source: DataAccessError,
}

///
/// ErrorClass
/// Internal error taxonomy for runtime classification.
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorClass {
    Execution,
    NotFound,
    Internal,
    Conflict,
    Unsupported,
    InvariantViolation,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Execution => "execution",
            Self::NotFound => "not_found",
            Self::Internal => "internal",
            Self::Conflict => "conflict",
            Self::Unsupported => "unsupported",
            Self::InvariantViolation => "invariant_violation",
        };
        write!(f, "{label}")
    }
}

///
/// ErrorOrigin
/// Internal origin taxonomy for runtime classification.
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorOrigin {
    Cursor,
    Statement,
    Bind,
    Layout,
    Plan,
    Response,
    Materializer,
}

impl fmt::Display for ErrorOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Cursor => "cursor",
            Self::Statement => "statement",
            Self::Bind => "bind",
            Self::Layout => "layout",
            Self::Plan => "plan",
            Self::Response => "response",
            Self::Materializer => "materializer",
        };
        write!(f, "{label}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn execution_context_wraps_driver_fault() {
        let err = InternalError::execution(
            ErrorOrigin::Statement,
            DataAccessError::driver("relation \"orders\" does not exist"),
        )
        .with_execution_context("select * from orders", "42");

        let fault = err.execution_fault().expect("fault detail should be attached");
        assert_eq!(fault.sql, "select * from orders");
        assert_eq!(fault.bind_trace, "42");
        assert!(err.message.contains("bind[42]"));
        assert!(err.message.contains("sql[select * from orders]"));
    }

    #[test]
    fn execution_context_leaves_other_classes_alone() {
        let err = InternalError::layout_invariant("root identity column is null")
            .with_execution_context("select 1", "");

        assert_eq!(err.class, ErrorClass::InvariantViolation);
        assert!(err.execution_fault().is_none());
        assert_eq!(err.message, "root identity column is null");
    }
}
