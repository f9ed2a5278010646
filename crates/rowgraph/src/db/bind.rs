use crate::{
    db::driver::{DataAccessError, PreparedStatement},
    value::Value,
};

///
/// DataBind
///
/// Sequential parameter binder over one prepared statement.
///

pub struct DataBind<'a> {
    statement: &'a mut dyn PreparedStatement,
    position: usize,
}

impl<'a> DataBind<'a> {
    pub fn new(statement: &'a mut dyn PreparedStatement) -> Self {
        Self {
            statement,
            position: 0,
        }
    }

    /// Bind the next positional parameter.
    pub fn bind(&mut self, value: Value) -> Result<(), DataAccessError> {
        self.position += 1;
        self.statement.set_parameter(self.position, value)
    }

    /// Number of parameters bound so far.
    #[must_use]
    pub const fn bound(&self) -> usize {
        self.position
    }
}

///
/// BindPredicates
///
/// Predicate values of one execution. Binding returns the human-readable
/// bind trace used in diagnostics.
///

pub trait BindPredicates: Send {
    fn bind(&self, target: &mut DataBind<'_>) -> Result<String, DataAccessError>;
}

///
/// BindValues
/// Ordered positional values; the trace is their comma-joined display form.
///

#[derive(Clone, Debug, Default)]
pub struct BindValues(Vec<Value>);

impl BindValues {
    #[must_use]
    pub const fn new(values: Vec<Value>) -> Self {
        Self(values)
    }

    #[must_use]
    pub fn values(&self) -> &[Value] {
        &self.0
    }
}

impl BindPredicates for BindValues {
    fn bind(&self, target: &mut DataBind<'_>) -> Result<String, DataAccessError> {
        let mut trace = Vec::with_capacity(self.0.len());
        for value in &self.0 {
            trace.push(value.to_string());
            target.bind(value.clone())?;
        }

        Ok(trace.join(","))
    }
}

impl<V: Into<Value>> FromIterator<V> for BindValues {
    fn from_iter<I: IntoIterator<Item = V>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}
