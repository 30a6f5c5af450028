//! Rows, primary keys and tracking metadata.

use crate::schema::TableSchema;
use scopesync_codec::{
    required_field, required_integer, CodecError, CodecResult, FromValue, ToValue, Value,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Column values of one row, keyed by column name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Row {
    values: BTreeMap<String, Value>,
}

impl Row {
    /// Creates an empty row.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style column setter.
    #[must_use]
    pub fn with(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(column, value);
        self
    }

    /// Sets a column value.
    pub fn set(&mut self, column: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(column.into(), value.into());
    }

    /// Returns a column value.
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.values.get(column)
    }

    /// Removes a column.
    pub fn remove(&mut self, column: &str) -> Option<Value> {
        self.values.remove(column)
    }

    /// Iterates columns in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of columns present.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true if the row has no columns.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Approximate serialized footprint in bytes.
    pub fn approximate_size(&self) -> usize {
        self.values
            .iter()
            .map(|(k, v)| k.len() + v.approximate_size())
            .sum()
    }

    /// Extracts the primary key, or `None` if any key column is missing or null.
    pub fn primary_key(&self, table: &TableSchema) -> Option<PrimaryKey> {
        table
            .primary_keys()
            .iter()
            .map(|col| match self.values.get(col) {
                None | Some(Value::Null) => None,
                Some(v) => Some(v.clone()),
            })
            .collect::<Option<Vec<_>>>()
            .map(PrimaryKey)
    }

    /// Returns a new row holding only the given columns.
    pub fn project(&self, columns: &[String]) -> Row {
        Row {
            values: columns
                .iter()
                .filter_map(|c| self.values.get(c).map(|v| (c.clone(), v.clone())))
                .collect(),
        }
    }

    /// Returns a new row holding only the table's primary key columns.
    pub fn key_projection(&self, table: &TableSchema) -> Row {
        self.project(table.primary_keys())
    }
}

impl ToValue for Row {
    fn to_value(&self) -> Value {
        Value::Map(
            self.values
                .iter()
                .map(|(k, v)| (Value::Text(k.clone()), v.clone()))
                .collect(),
        )
    }
}

impl FromValue for Row {
    fn from_value(value: &Value) -> CodecResult<Self> {
        let pairs = value
            .as_map()
            .ok_or_else(|| CodecError::invalid_structure("expected map for Row"))?;
        let mut row = Row::new();
        for (k, v) in pairs {
            let column = k
                .as_text()
                .ok_or_else(|| CodecError::invalid_structure("row column names must be text"))?;
            row.set(column, v.clone());
        }
        Ok(row)
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Row {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Row {
            values: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}

/// Primary key values in the table's key column order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PrimaryKey(pub Vec<Value>);

impl PrimaryKey {
    /// Single-column key.
    pub fn single(value: impl Into<Value>) -> Self {
        Self(vec![value.into()])
    }

    /// Key values.
    pub fn values(&self) -> &[Value] {
        &self.0
    }
}

impl fmt::Display for PrimaryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for (i, v) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            match v {
                Value::Text(s) => write!(f, "{s:?}")?,
                Value::Integer(n) => write!(f, "{n}")?,
                other => write!(f, "{other:?}")?,
            }
        }
        f.write_str(")")
    }
}

/// Tracking columns kept by the data store alongside every user row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrackingMetadata {
    /// Scope that created the row, `None` if created locally.
    pub create_scope_id: Option<Uuid>,
    /// Scope that last updated the row, `None` if updated locally.
    pub update_scope_id: Option<Uuid>,
    /// Store timestamp of creation.
    pub create_timestamp: i64,
    /// Store timestamp of the last update (or delete).
    pub update_timestamp: i64,
    /// True if the row has been deleted.
    pub is_tombstone: bool,
}

impl TrackingMetadata {
    /// Metadata of a row freshly written by `scope` at `timestamp`.
    pub fn created(scope: Option<Uuid>, timestamp: i64) -> Self {
        Self {
            create_scope_id: scope,
            update_scope_id: scope,
            create_timestamp: timestamp,
            update_timestamp: timestamp,
            is_tombstone: false,
        }
    }
}

/// A user row together with its tracking metadata.
///
/// When `metadata.is_tombstone` is set, `row` carries only key columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedRow {
    /// Column values.
    pub row: Row,
    /// Tracking metadata.
    pub metadata: TrackingMetadata,
}

/// Logical state of a row relative to a requesting scope.
///
/// Derived by classification, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RowState {
    /// The requester has never seen this row.
    Inserted,
    /// The requester has an older version.
    Updated,
    /// The row was deleted.
    Deleted,
    /// Nothing to send.
    Unchanged,
}

impl RowState {
    /// Converts to a numeric code for encoding.
    pub fn to_code(&self) -> u8 {
        match self {
            RowState::Unchanged => 0,
            RowState::Inserted => 1,
            RowState::Updated => 2,
            RowState::Deleted => 3,
        }
    }

    /// Converts from a numeric code.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(RowState::Unchanged),
            1 => Some(RowState::Inserted),
            2 => Some(RowState::Updated),
            3 => Some(RowState::Deleted),
            _ => None,
        }
    }

    /// Returns true for states that are transmitted.
    pub fn is_selected(&self) -> bool {
        !matches!(self, RowState::Unchanged)
    }
}

/// A classified row as carried in a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRow {
    /// Classification relative to the receiving scope.
    pub state: RowState,
    /// Column values (key columns only for deletes).
    pub row: Row,
}

impl SyncRow {
    /// Creates a classified row.
    pub fn new(state: RowState, row: Row) -> Self {
        Self { state, row }
    }

    /// Approximate footprint, including the state marker.
    pub fn approximate_size(&self) -> usize {
        1 + self.row.approximate_size()
    }
}

impl ToValue for SyncRow {
    fn to_value(&self) -> Value {
        Value::text_map(vec![
            ("state", Value::Integer(i64::from(self.state.to_code()))),
            ("values", self.row.to_value()),
        ])
    }
}

impl FromValue for SyncRow {
    fn from_value(value: &Value) -> CodecResult<Self> {
        let code = required_integer(value, "state")?;
        let state = u8::try_from(code)
            .ok()
            .and_then(RowState::from_code)
            .filter(RowState::is_selected)
            .ok_or_else(|| CodecError::invalid_structure(format!("invalid row state {code}")))?;
        let row = Row::from_value(required_field(value, "values")?)?;
        Ok(Self { state, row })
    }
}
