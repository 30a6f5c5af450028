//! Session stages, attached to errors for diagnostics.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A checkpoint within a synchronization session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SyncStage {
    /// Acquiring the session guard.
    BeginSession,
    /// Reading or creating scope records.
    ScopeLoading,
    /// Enumerating and batching changes.
    ChangesSelecting,
    /// Writing changes and resolving conflicts.
    ChangesApplying,
    /// Persisting the new scope watermark.
    ScopeWriting,
    /// Releasing the session guard.
    EndSession,
    /// Removing spooled batch directories.
    Cleanup,
}

impl SyncStage {
    /// Stable name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            SyncStage::BeginSession => "begin_session",
            SyncStage::ScopeLoading => "scope_loading",
            SyncStage::ChangesSelecting => "changes_selecting",
            SyncStage::ChangesApplying => "changes_applying",
            SyncStage::ScopeWriting => "scope_writing",
            SyncStage::EndSession => "end_session",
            SyncStage::Cleanup => "cleanup",
        }
    }
}

impl fmt::Display for SyncStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
