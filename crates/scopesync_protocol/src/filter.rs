//! Row filters.

use crate::row::Row;
use scopesync_codec::Value;
use serde::{Deserialize, Serialize};

/// Restricts the rows of one table to those whose `column` equals `value`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowFilter {
    /// Filtered table.
    pub table: String,
    /// Column compared.
    pub column: String,
    /// Required value.
    pub value: Value,
}

impl RowFilter {
    /// Creates a filter.
    pub fn new(
        table: impl Into<String>,
        column: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        Self {
            table: table.into(),
            column: column.into(),
            value: value.into(),
        }
    }

    /// Returns true if the row passes. Rows of other tables always pass.
    pub fn matches(&self, table: &str, row: &Row) -> bool {
        self.table != table || row.get(&self.column) == Some(&self.value)
    }
}

/// Filter values supplied for one session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncParameters {
    /// All filters; a row must pass every filter on its table.
    pub filters: Vec<RowFilter>,
}

impl SyncParameters {
    /// No filtering.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a filter.
    #[must_use]
    pub fn with_filter(
        mut self,
        table: impl Into<String>,
        column: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        self.filters.push(RowFilter::new(table, column, value));
        self
    }

    /// Filters that apply to `table`.
    pub fn for_table<'a>(&'a self, table: &'a str) -> impl Iterator<Item = &'a RowFilter> + 'a {
        self.filters.iter().filter(move |f| f.table == table)
    }

    /// Returns true if the row passes every filter.
    pub fn matches(&self, table: &str, row: &Row) -> bool {
        self.filters.iter().all(|f| f.matches(table, row))
    }
}
