//! Error types for data store operations.

use crate::outcome::Rejection;
use scopesync_protocol::PrimaryKey;
use thiserror::Error;

/// Result type for data store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur during data store operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The store cannot be reached.
    #[error("data store unavailable: {0}")]
    Unavailable(String),

    /// A transaction could not be started, committed or rolled back.
    #[error("transaction failed: {0}")]
    Transaction(String),

    /// The transaction token is unknown or already finished.
    #[error("transaction {0} is not active")]
    TransactionNotActive(u64),

    /// The table has not been provisioned.
    #[error("unknown table `{0}`")]
    UnknownTable(String),

    /// A row handed to the store is malformed.
    #[error("invalid row for table `{table}`: {message}")]
    InvalidRow {
        /// Table name.
        table: String,
        /// Problem description.
        message: String,
    },

    /// A local write was refused.
    #[error("write to `{table}` {key} rejected: {rejection}")]
    Rejected {
        /// Table name.
        table: String,
        /// Key of the refused row.
        key: PrimaryKey,
        /// Why the store refused it.
        rejection: Rejection,
    },

    /// A fault armed through a fail point fired.
    #[error("injected failure at {0}")]
    Injected(String),
}

impl StoreError {
    /// Creates a transaction error.
    pub fn transaction(message: impl Into<String>) -> Self {
        StoreError::Transaction(message.into())
    }

    /// Creates an invalid-row error.
    pub fn invalid_row(table: impl Into<String>, message: impl Into<String>) -> Self {
        StoreError::InvalidRow {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Returns true for connectivity and transaction failures, which abort
    /// the session. Row-level refusals return false.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, StoreError::Rejected { .. })
    }

    /// Returns true if retrying the whole session may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StoreError::Unavailable(_) | StoreError::Transaction(_) | StoreError::Injected(_)
        )
    }
}
