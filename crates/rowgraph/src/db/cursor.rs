use crate::{
    db::driver::{DataAccessError, RowSource},
    value::Value,
};

///
/// RowCursor
///
/// Adapter over a [`RowSource`] that tracks the column read position within
/// the current row. Layout trees read columns left to right through it.
///

pub struct RowCursor {
    source: Option<Box<dyn RowSource>>,
    position: usize,
}

impl RowCursor {
    #[must_use]
    pub fn new(source: Box<dyn RowSource>) -> Self {
        Self {
            source: Some(source),
            position: 0,
        }
    }

    fn source(&self) -> Result<&dyn RowSource, DataAccessError> {
        self.source.as_deref().ok_or(DataAccessError::Closed)
    }

    /// Advance to the next row. Does not touch the column position.
    pub fn next_row(&mut self) -> Result<bool, DataAccessError> {
        match self.source.as_deref_mut() {
            Some(source) => source.advance(),
            None => Err(DataAccessError::Closed),
        }
    }

    pub const fn reset_column_position(&mut self) {
        self.position = 0;
    }

    pub const fn increment_position(&mut self, columns: usize) {
        self.position = self.position.saturating_add(columns);
    }

    #[must_use]
    pub const fn position(&self) -> usize {
        self.position
    }

    pub fn column_count(&self) -> Result<usize, DataAccessError> {
        Ok(self.source()?.column_count())
    }

    /// Read the value at the current position, then move past it.
    pub fn read(&mut self) -> Result<Value, DataAccessError> {
        let source = self.source()?;
        let count = source.column_count();
        if self.position >= count {
            return Err(DataAccessError::ColumnOutOfRange {
                index: self.position,
                count,
            });
        }

        let value = source.column(self.position)?;
        self.position += 1;

        Ok(value)
    }

    pub fn read_bool(&mut self) -> Result<Option<bool>, DataAccessError> {
        let index = self.position;
        match self.read()? {
            Value::Null => Ok(None),
            Value::Bool(v) => Ok(Some(v)),
            other => Err(mismatch(index, "bool", &other)),
        }
    }

    pub fn read_i64(&mut self) -> Result<Option<i64>, DataAccessError> {
        let index = self.position;
        match self.read()? {
            Value::Null => Ok(None),
            Value::Int(v) => Ok(Some(v)),
            Value::Uint(v) => i64::try_from(v)
                .map(Some)
                .map_err(|_| mismatch(index, "int", &Value::Uint(v))),
            other => Err(mismatch(index, "int", &other)),
        }
    }

    pub fn read_u64(&mut self) -> Result<Option<u64>, DataAccessError> {
        let index = self.position;
        match self.read()? {
            Value::Null => Ok(None),
            Value::Uint(v) => Ok(Some(v)),
            Value::Int(v) => u64::try_from(v)
                .map(Some)
                .map_err(|_| mismatch(index, "uint", &Value::Int(v))),
            other => Err(mismatch(index, "uint", &other)),
        }
    }

    #[expect(clippy::cast_precision_loss)]
    pub fn read_f64(&mut self) -> Result<Option<f64>, DataAccessError> {
        let index = self.position;
        match self.read()? {
            Value::Null => Ok(None),
            Value::Float(v) => Ok(Some(v)),
            Value::Int(v) => Ok(Some(v as f64)),
            other => Err(mismatch(index, "float", &other)),
        }
    }

    pub fn read_text(&mut self) -> Result<Option<String>, DataAccessError> {
        let index = self.position;
        match self.read()? {
            Value::Null => Ok(None),
            Value::Text(v) => Ok(Some(v)),
            other => Err(mismatch(index, "text", &other)),
        }
    }

    #[must_use]
    pub const fn is_closed(&self) -> bool {
        self.source.is_none()
    }

    /// Release the underlying source. Safe to call more than once; the
    /// source is closed at most once.
    pub fn close(&mut self) -> Result<(), DataAccessError> {
        match self.source.take() {
            Some(mut source) => source.close(),
            None => Ok(()),
        }
    }
}

fn mismatch(index: usize, expected: &'static str, found: &Value) -> DataAccessError {
    DataAccessError::TypeMismatch {
        index,
        expected,
        found: found.kind(),
    }
}
