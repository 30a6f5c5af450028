//! Conflict classification and resolution types.

use crate::row::{Row, RowState};
use serde::{Deserialize, Serialize};
use std::fmt;

/// What the destination holds for a conflicting row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LocalRowState {
    /// No row with that key.
    NotExists,
    /// A live row.
    Exists,
    /// A tombstone.
    IsDeleted,
}

/// Classification of a row whose optimistic write failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConflictType {
    /// Remote insert or update, no local row.
    RemoteExistsLocalNotExists,
    /// Remote and local both updated.
    RemoteExistsLocalExists,
    /// Remote updated a row the destination deleted.
    RemoteExistsLocalIsDeleted,
    /// Remote deleted a row the destination never had.
    RemoteIsDeletedLocalNotExists,
    /// Remote deleted a row the destination updated.
    RemoteIsDeletedLocalExists,
    /// Both sides deleted.
    RemoteIsDeletedLocalIsDeleted,
    /// An insert collided with a unique constraint.
    UniqueKeyConstraint,
    /// Any combination with no defined resolution.
    ErrorsOccurred,
}

impl ConflictType {
    /// Classifies from the remote row state and what the destination holds.
    pub fn classify(remote: RowState, local: LocalRowState) -> Self {
        match (remote, local) {
            (RowState::Inserted | RowState::Updated, LocalRowState::NotExists) => {
                ConflictType::RemoteExistsLocalNotExists
            }
            (RowState::Inserted | RowState::Updated, LocalRowState::Exists) => {
                ConflictType::RemoteExistsLocalExists
            }
            (RowState::Inserted | RowState::Updated, LocalRowState::IsDeleted) => {
                ConflictType::RemoteExistsLocalIsDeleted
            }
            (RowState::Deleted, LocalRowState::NotExists) => {
                ConflictType::RemoteIsDeletedLocalNotExists
            }
            (RowState::Deleted, LocalRowState::Exists) => ConflictType::RemoteIsDeletedLocalExists,
            (RowState::Deleted, LocalRowState::IsDeleted) => {
                ConflictType::RemoteIsDeletedLocalIsDeleted
            }
            (RowState::Unchanged, _) => ConflictType::ErrorsOccurred,
        }
    }
}

impl fmt::Display for ConflictType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Session-wide resolution policy, stated from the server's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ConflictResolutionPolicy {
    /// The server's row survives.
    #[default]
    ServerWins,
    /// The client's row survives.
    ClientWins,
}

impl ConflictResolutionPolicy {
    /// The same outcome seen from the other participant.
    pub fn reversed(&self) -> Self {
        match self {
            ConflictResolutionPolicy::ServerWins => ConflictResolutionPolicy::ClientWins,
            ConflictResolutionPolicy::ClientWins => ConflictResolutionPolicy::ServerWins,
        }
    }

    /// The per-row resolution this policy selects.
    pub fn as_resolution(&self) -> ConflictResolution {
        match self {
            ConflictResolutionPolicy::ServerWins => ConflictResolution::ServerWins,
            ConflictResolutionPolicy::ClientWins => ConflictResolution::ClientWins,
        }
    }
}

/// Resolution chosen for one conflict.
///
/// `ServerWins` keeps the destination row, `ClientWins` forces the remote row
/// onto the destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConflictResolution {
    /// Keep the destination row.
    ServerWins,
    /// Force the remote row.
    ClientWins,
    /// Write a merged row authored locally.
    MergeRow,
    /// Abandon this row.
    Rollback,
}

impl ConflictResolution {
    /// Converts to a code.
    pub fn to_code(&self) -> u8 {
        match self {
            ConflictResolution::ServerWins => 1,
            ConflictResolution::ClientWins => 2,
            ConflictResolution::MergeRow => 3,
            ConflictResolution::Rollback => 4,
        }
    }

    /// Converts from a code.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(ConflictResolution::ServerWins),
            2 => Some(ConflictResolution::ClientWins),
            3 => Some(ConflictResolution::MergeRow),
            4 => Some(ConflictResolution::Rollback),
            _ => None,
        }
    }
}

/// What the applier does next with a conflicting row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ApplyAction {
    /// Leave the destination as it is.
    Continue,
    /// Write again with the concurrency predicate bypassed.
    RetryWithForceWrite,
    /// Fail this row.
    Rollback,
}

/// A row whose optimistic write failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConflict {
    /// Table of the row.
    pub table: String,
    /// Classification.
    pub conflict_type: ConflictType,
    /// Destination row, if it exists (key columns only for tombstones).
    pub local_row: Option<Row>,
    /// Incoming row (key columns only for deletes).
    pub remote_row: Option<Row>,
    /// Store diagnostic, for constraint failures.
    pub error_message: Option<String>,
}

/// Result of resolving one conflict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictOutcome {
    /// Resolution that was applied.
    pub policy_applied: ConflictResolution,
    /// Follow-up action.
    pub action: ApplyAction,
    /// Row to write for a forced write or merge.
    pub final_row: Option<Row>,
}
