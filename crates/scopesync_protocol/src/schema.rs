//! Immutable table descriptors and the ordered sync setup.
//!
//! Descriptors never carry tracking columns. Stores attach tracking metadata
//! next to the user row (see [`TrackedRow`](crate::TrackedRow)) instead of
//! widening a shared schema.

use crate::error::{SetupError, SetupResult};
use scopesync_codec::Value;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Declared type of a column.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnType {
    /// Boolean.
    Boolean,
    /// 64-bit signed integer.
    Integer,
    /// Double precision float. Integer values are accepted and widened.
    Real,
    /// UTF-8 text.
    Text,
    /// Byte string.
    Blob,
    /// A store type with no portable representation.
    Unsupported(String),
}

impl ColumnType {
    /// Returns true if `value` can be stored in a column of this type.
    ///
    /// Nullability is checked by [`ColumnSchema::accepts`].
    pub fn accepts(&self, value: &Value) -> bool {
        matches!(
            (self, value),
            (ColumnType::Boolean, Value::Bool(_))
                | (ColumnType::Integer, Value::Integer(_))
                | (ColumnType::Real, Value::Float(_) | Value::Integer(_))
                | (ColumnType::Text, Value::Text(_))
                | (ColumnType::Blob, Value::Bytes(_))
        )
    }

    /// Type name for diagnostics.
    pub fn name(&self) -> &str {
        match self {
            ColumnType::Boolean => "boolean",
            ColumnType::Integer => "integer",
            ColumnType::Real => "real",
            ColumnType::Text => "text",
            ColumnType::Blob => "blob",
            ColumnType::Unsupported(name) => name,
        }
    }
}

/// One column of a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSchema {
    /// Column name.
    pub name: String,
    /// Declared type.
    pub column_type: ColumnType,
    /// Whether null is allowed.
    pub nullable: bool,
}

impl ColumnSchema {
    /// Creates a nullable column.
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            nullable: true,
        }
    }

    /// Marks the column as not null.
    #[must_use]
    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Returns true if `value` is valid for this column.
    pub fn accepts(&self, value: &Value) -> bool {
        if value.is_null() {
            self.nullable
        } else {
            self.column_type.accepts(value)
        }
    }
}

/// A foreign key from a child table to its parent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKey {
    /// Constraint name.
    pub name: String,
    /// Child columns.
    pub columns: Vec<String>,
    /// Parent table.
    pub parent_table: String,
    /// Parent columns, matched positionally with `columns`.
    pub parent_columns: Vec<String>,
}

/// A unique constraint over one or more columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UniqueConstraint {
    /// Constraint name.
    pub name: String,
    /// Constrained columns.
    pub columns: Vec<String>,
}

/// Direction of one synchronization pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SyncDirection {
    /// Client to server.
    Upload,
    /// Server to client.
    Download,
}

/// Which passes a table takes part in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TableSyncDirection {
    /// Both passes.
    #[default]
    Bidirectional,
    /// Client changes only.
    UploadOnly,
    /// Server changes only.
    DownloadOnly,
    /// Never synchronized.
    None,
}

impl TableSyncDirection {
    /// Returns true if the table is read during a pass in `direction`.
    pub fn allows(&self, direction: SyncDirection) -> bool {
        match self {
            TableSyncDirection::Bidirectional => true,
            TableSyncDirection::UploadOnly => direction == SyncDirection::Upload,
            TableSyncDirection::DownloadOnly => direction == SyncDirection::Download,
            TableSyncDirection::None => false,
        }
    }
}

/// Immutable description of a synchronized table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    name: String,
    columns: Vec<ColumnSchema>,
    primary_keys: Vec<String>,
    foreign_keys: Vec<ForeignKey>,
    unique_constraints: Vec<UniqueConstraint>,
    direction: TableSyncDirection,
}

impl TableSchema {
    /// Starts a table description.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            primary_keys: Vec::new(),
            foreign_keys: Vec::new(),
            unique_constraints: Vec::new(),
            direction: TableSyncDirection::default(),
        }
    }

    /// Adds a column.
    #[must_use]
    pub fn column(mut self, column: ColumnSchema) -> Self {
        self.columns.push(column);
        self
    }

    /// Sets the primary key columns.
    #[must_use]
    pub fn primary_key(mut self, columns: &[&str]) -> Self {
        self.primary_keys = columns.iter().map(|c| (*c).to_string()).collect();
        self
    }

    /// Adds a foreign key.
    #[must_use]
    pub fn foreign_key(
        mut self,
        name: impl Into<String>,
        columns: &[&str],
        parent_table: impl Into<String>,
        parent_columns: &[&str],
    ) -> Self {
        self.foreign_keys.push(ForeignKey {
            name: name.into(),
            columns: columns.iter().map(|c| (*c).to_string()).collect(),
            parent_table: parent_table.into(),
            parent_columns: parent_columns.iter().map(|c| (*c).to_string()).collect(),
        });
        self
    }

    /// Adds a unique constraint.
    #[must_use]
    pub fn unique(mut self, name: impl Into<String>, columns: &[&str]) -> Self {
        self.unique_constraints.push(UniqueConstraint {
            name: name.into(),
            columns: columns.iter().map(|c| (*c).to_string()).collect(),
        });
        self
    }

    /// Sets the sync direction.
    #[must_use]
    pub fn direction(mut self, direction: TableSyncDirection) -> Self {
        self.direction = direction;
        self
    }

    /// Table name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Columns in declaration order.
    pub fn columns(&self) -> &[ColumnSchema] {
        &self.columns
    }

    /// Looks up a column.
    pub fn column_named(&self, name: &str) -> Option<&ColumnSchema> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Primary key columns in key order.
    pub fn primary_keys(&self) -> &[String] {
        &self.primary_keys
    }

    /// Foreign keys.
    pub fn foreign_keys(&self) -> &[ForeignKey] {
        &self.foreign_keys
    }

    /// Unique constraints.
    pub fn unique_constraints(&self) -> &[UniqueConstraint] {
        &self.unique_constraints
    }

    /// Sync direction.
    pub fn sync_direction(&self) -> TableSyncDirection {
        self.direction
    }

    fn validate(&self) -> SetupResult<()> {
        if self.primary_keys.is_empty() {
            return Err(SetupError::MissingPrimaryKey {
                table: self.name.clone(),
            });
        }

        for column in &self.columns {
            if let ColumnType::Unsupported(type_name) = &column.column_type {
                return Err(SetupError::UnsupportedColumnType {
                    table: self.name.clone(),
                    column: column.name.clone(),
                    type_name: type_name.clone(),
                });
            }
        }

        let referenced = self
            .primary_keys
            .iter()
            .chain(self.foreign_keys.iter().flat_map(|fk| fk.columns.iter()))
            .chain(self.unique_constraints.iter().flat_map(|u| u.columns.iter()));
        for column in referenced {
            if self.column_named(column).is_none() {
                return Err(SetupError::UnknownColumn {
                    table: self.name.clone(),
                    column: column.clone(),
                });
            }
        }
        Ok(())
    }
}

/// The validated, dependency-ordered set of synchronized tables.
///
/// Tables are stored parents first, so iterating forward gives the
/// insert/update order and iterating in reverse gives the delete order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSetup {
    tables: Vec<TableSchema>,
}

impl SyncSetup {
    /// Validates `tables` and orders them by foreign-key dependency.
    ///
    /// The order is stable: among tables with no dependency between them the
    /// declaration order is kept. Self references do not constrain the order.
    pub fn new(tables: Vec<TableSchema>) -> SetupResult<Self> {
        let mut seen = BTreeSet::new();
        for table in &tables {
            if !seen.insert(table.name.clone()) {
                return Err(SetupError::DuplicateTable {
                    table: table.name.clone(),
                });
            }
            table.validate()?;
        }

        let position: HashMap<&str, usize> = tables
            .iter()
            .enumerate()
            .map(|(i, t)| (t.name.as_str(), i))
            .collect();

        let mut in_degree = vec![0usize; tables.len()];
        let mut children: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); tables.len()];
        for (child, table) in tables.iter().enumerate() {
            let parents: BTreeSet<usize> = table
                .foreign_keys
                .iter()
                .map(|fk| {
                    position.get(fk.parent_table.as_str()).copied().ok_or_else(|| {
                        SetupError::UnknownParentTable {
                            table: table.name.clone(),
                            parent: fk.parent_table.clone(),
                        }
                    })
                })
                .collect::<SetupResult<_>>()?;
            for parent in parents.into_iter().filter(|p| *p != child) {
                if children[parent].insert(child) {
                    in_degree[child] += 1;
                }
            }
        }

        // Kahn's algorithm, always taking the lowest declared index that is ready.
        let mut ready: BTreeSet<usize> = (0..tables.len()).filter(|i| in_degree[*i] == 0).collect();
        let mut order = Vec::with_capacity(tables.len());
        while let Some(next) = ready.pop_first() {
            order.push(next);
            for &child in &children[next] {
                in_degree[child] -= 1;
                if in_degree[child] == 0 {
                    ready.insert(child);
                }
            }
        }

        if order.len() != tables.len() {
            let placed: BTreeSet<usize> = order.iter().copied().collect();
            return Err(SetupError::DependencyCycle {
                tables: (0..tables.len())
                    .filter(|i| !placed.contains(i))
                    .map(|i| tables[i].name.clone())
                    .collect(),
            });
        }

        let mut slots: BTreeMap<usize, TableSchema> = tables.into_iter().enumerate().collect();
        let tables = order
            .into_iter()
            .filter_map(|i| slots.remove(&i))
            .collect();
        Ok(Self { tables })
    }

    /// Tables, parents first.
    pub fn tables(&self) -> &[TableSchema] {
        &self.tables
    }

    /// Looks up a table by name.
    pub fn table(&self, name: &str) -> Option<&TableSchema> {
        self.tables.iter().find(|t| t.name == name)
    }

    /// Tables in insert/update order.
    pub fn forward(&self) -> impl DoubleEndedIterator<Item = &TableSchema> {
        self.tables.iter()
    }

    /// Tables in delete order.
    pub fn reverse(&self) -> impl Iterator<Item = &TableSchema> {
        self.tables.iter().rev()
    }
}
