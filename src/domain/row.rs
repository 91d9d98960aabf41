//! Column-keyed rows
//!
//! A [`Row`] is one source tuple (keyed by the source descriptor's columns)
//! or one target-shaped record (keyed by target column names).

use super::value::Value;
use std::collections::BTreeMap;

/// A single row, keyed by column name
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    cells: BTreeMap<String, Value>,
}

impl Row {
    /// Creates an empty row
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cell for `column`, or [`Value::Null`] if absent
    pub fn get(&self, column: &str) -> &Value {
        static NULL: Value = Value::Null;
        self.cells.get(column).unwrap_or(&NULL)
    }

    /// Whether the row has a cell for `column`
    pub fn contains(&self, column: &str) -> bool {
        self.cells.contains_key(column)
    }

    /// Sets a cell, replacing any previous value
    pub fn set(&mut self, column: impl Into<String>, value: impl Into<Value>) {
        self.cells.insert(column.into(), value.into());
    }

    /// Builder-style [`Row::set`]
    pub fn with(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(column, value);
        self
    }

    /// Removes and returns a cell
    pub fn take(&mut self, column: &str) -> Value {
        self.cells.remove(column).unwrap_or(Value::Null)
    }

    /// Projects the row onto `columns`, in order
    pub fn values_for<'a>(&'a self, columns: &'a [String]) -> impl Iterator<Item = &'a Value> + 'a {
        columns.iter().map(move |c| self.get(c))
    }

    /// Column names present in this row
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.cells.keys().map(String::as_str)
    }

    /// Number of cells
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// Whether the row has no cells
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Row {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut row = Row::new();
        for (k, v) in iter {
            row.set(k, v);
        }
        row
    }
}
