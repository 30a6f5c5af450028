//! Protocol error types.

use thiserror::Error;

/// Result type for setup validation.
pub type SetupResult<T> = Result<T, SetupError>;

/// Errors raised while validating a [`SyncSetup`](crate::SyncSetup).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SetupError {
    /// A table declares no primary key.
    #[error("table `{table}` has no primary key")]
    MissingPrimaryKey {
        /// Table name.
        table: String,
    },

    /// A key, constraint or foreign key names a column the table does not have.
    #[error("table `{table}` references unknown column `{column}`")]
    UnknownColumn {
        /// Table name.
        table: String,
        /// Column name.
        column: String,
    },

    /// A foreign key names a table outside the setup.
    #[error("table `{table}` references unknown parent table `{parent}`")]
    UnknownParentTable {
        /// Child table.
        table: String,
        /// Missing parent.
        parent: String,
    },

    /// A table appears twice.
    #[error("table `{table}` is declared more than once")]
    DuplicateTable {
        /// Table name.
        table: String,
    },

    /// Foreign keys form a cycle, so no apply order exists.
    #[error("foreign key cycle between tables {tables:?}")]
    DependencyCycle {
        /// Tables left unordered.
        tables: Vec<String>,
    },

    /// A column has a type the engine cannot carry.
    #[error("column `{table}.{column}` has unsupported type `{type_name}`")]
    UnsupportedColumnType {
        /// Table name.
        table: String,
        /// Column name.
        column: String,
        /// Declared type.
        type_name: String,
    },
}

/// Errors raised when a batch manifest violates its ordering guarantees.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ManifestError {
    /// The manifest lists no parts.
    #[error("batch manifest lists no parts")]
    Empty,

    /// Part indexes are not `0..N-1` in order.
    #[error("batch part index gap: expected {expected}, found {found}")]
    IndexGap {
        /// Expected index.
        expected: u32,
        /// Index found at that position.
        found: u32,
    },

    /// No part is flagged last.
    #[error("batch manifest has no last part")]
    MissingLast,

    /// A part other than the final one is flagged last.
    #[error("batch part {index} is flagged last but is not the final part")]
    MisplacedLast {
        /// Offending part index.
        index: u32,
    },

    /// The parts' row counts do not add up to the manifest total.
    #[error("batch manifest row count {expected} does not match parts total {actual}")]
    RowCountMismatch {
        /// Count recorded in the manifest.
        expected: usize,
        /// Sum over parts.
        actual: usize,
    },

    /// The manifest format version is not understood.
    #[error("unsupported batch manifest version {version}")]
    UnsupportedVersion {
        /// Version found.
        version: u32,
    },
}
