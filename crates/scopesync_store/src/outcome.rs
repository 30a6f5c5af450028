//! Write requests and outcomes.
//!
//! A refused write is data, not an error: `write_row` returns
//! `StoreResult<WriteOutcome>`, where the outer `Err` is a store failure and
//! the inner `Err` is a [`Rejection`] the caller turns into a conflict.

use scopesync_protocol::{Row, RowState, TrackingMetadata};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Kind of row write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WriteOp {
    /// Create the row, or replace it when it exists.
    Insert,
    /// Replace the row, or create it when it is absent.
    Update,
    /// Turn the row into a tombstone.
    Delete,
}

impl WriteOp {
    /// The write that carries a classified row.
    pub fn for_state(state: RowState) -> Option<Self> {
        match state {
            RowState::Inserted => Some(WriteOp::Insert),
            RowState::Updated => Some(WriteOp::Update),
            RowState::Deleted => Some(WriteOp::Delete),
            RowState::Unchanged => None,
        }
    }
}

/// One row write with its optimistic-concurrency inputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRequest {
    /// Operation.
    pub op: WriteOp,
    /// Row values; key columns at least.
    pub row: Row,
    /// Highest destination timestamp the sender is known to have seen.
    pub expected_timestamp: i64,
    /// Scope recorded as the row's updater, `None` for a local author.
    pub sender_scope_id: Option<Uuid>,
    /// Bypass the concurrency predicate.
    pub force: bool,
}

impl WriteRequest {
    /// An optimistic write on behalf of `sender`.
    pub fn new(op: WriteOp, row: Row, expected_timestamp: i64, sender: Option<Uuid>) -> Self {
        Self {
            op,
            row,
            expected_timestamp,
            sender_scope_id: sender,
            force: false,
        }
    }

    /// A write that bypasses the concurrency predicate.
    pub fn forced(op: WriteOp, row: Row, sender: Option<Uuid>) -> Self {
        Self {
            op,
            row,
            expected_timestamp: i64::MAX,
            sender_scope_id: sender,
            force: true,
        }
    }
}

/// A successful write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Applied {
    /// Tracking metadata after the write.
    pub metadata: TrackingMetadata,
}

/// Why a write affected no rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Rejection {
    /// The destination row changed after `expected_timestamp`, or there was
    /// nothing to delete.
    Concurrency,
    /// A unique constraint other than the primary key was violated.
    UniqueConstraint {
        /// Constraint name.
        name: String,
    },
    /// A foreign key or other check failed.
    Constraint {
        /// Store diagnostic.
        message: String,
    },
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::Concurrency => f.write_str("concurrency check failed"),
            Rejection::UniqueConstraint { name } => {
                write!(f, "unique constraint `{name}` violated")
            }
            Rejection::Constraint { message } => write!(f, "constraint violated: {message}"),
        }
    }
}

/// Outcome of one row write.
pub type WriteOutcome = Result<Applied, Rejection>;
