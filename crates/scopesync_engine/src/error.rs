//! Error types for the sync engine.

use scopesync_codec::CodecError;
use scopesync_protocol::{ManifestError, SetupError, SyncStage};
use scopesync_store::StoreError;
use thiserror::Error;
use uuid::Uuid;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// A single row is larger than the batch budget.
    #[error("row of {size} bytes in table `{table}` exceeds batch size {budget}")]
    RowOverSized {
        /// Table name.
        table: String,
        /// Approximate row size.
        size: usize,
        /// Configured budget.
        budget: usize,
    },

    /// A row is missing primary key values.
    #[error("row in table `{table}` is missing its primary key")]
    MissingPrimaryKey {
        /// Table name.
        table: String,
    },

    /// A value does not match its column's declared type.
    #[error("column `{table}.{column}` expects {expected}, found {found}")]
    ColumnTypeMismatch {
        /// Table name.
        table: String,
        /// Column name.
        column: String,
        /// Declared type.
        expected: String,
        /// Kind of the offending value.
        found: &'static str,
    },

    /// Another session holds the scope.
    #[error("a sync session is already in progress for `{scope}`")]
    SessionInProgress {
        /// Locked scope key.
        scope: String,
    },

    /// The client missed purged tombstones and cannot catch up incrementally.
    #[error(
        "client {client_id} is out of date: last sync {last_sync_timestamp} \
         precedes cleanup horizon {horizon}"
    )]
    OutOfDate {
        /// Client identity.
        client_id: Uuid,
        /// Reference watermark of the client.
        last_sync_timestamp: i64,
        /// Store cleanup horizon.
        horizon: i64,
    },

    /// The session was cancelled.
    #[error("sync cancelled")]
    Cancelled,

    /// A conflict resolution chose to roll the row back.
    #[error("conflict on `{table}` {key} was rolled back")]
    ConflictRollback {
        /// Table name.
        table: String,
        /// Row key.
        key: String,
    },

    /// A row could not be applied, even after resolution.
    #[error("row `{table}` {key} could not be applied: {reason}")]
    RowApplyFailed {
        /// Table name.
        table: String,
        /// Row key.
        key: String,
        /// Store diagnostic.
        reason: String,
    },

    /// The sync setup is invalid.
    #[error("invalid setup: {0}")]
    Setup(#[from] SetupError),

    /// Data store failure.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Part file encoding failure.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Manifest violates numbering or completeness.
    #[error("invalid batch manifest: {0}")]
    Manifest(#[from] ManifestError),

    /// A part file does not match its manifest entry.
    #[error("invalid batch: {0}")]
    InvalidBatch(String),

    /// Spool directory I/O failure.
    #[error("batch I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The agent cannot start a session from its current state.
    #[error("invalid state transition from {from} to {to}")]
    InvalidStateTransition {
        /// Current state.
        from: String,
        /// Attempted state.
        to: String,
    },

    /// A failure wrapped with the stage it occurred at.
    #[error("{source} (at {stage})")]
    Staged {
        /// Stage of the session.
        stage: SyncStage,
        /// Underlying error.
        #[source]
        source: Box<SyncError>,
    },
}

impl SyncError {
    /// Creates an invalid batch error.
    pub fn invalid_batch(message: impl Into<String>) -> Self {
        Self::InvalidBatch(message.into())
    }

    /// Stage the error was raised at, if recorded.
    pub fn stage(&self) -> Option<SyncStage> {
        match self {
            SyncError::Staged { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// The error without its stage wrapper.
    pub fn root(&self) -> &SyncError {
        match self {
            SyncError::Staged { source, .. } => source.root(),
            other => other,
        }
    }

    /// Returns true if running the session again may succeed.
    pub fn is_retryable(&self) -> bool {
        match self.root() {
            SyncError::Store(e) => e.is_transient(),
            SyncError::Io(_) | SyncError::SessionInProgress { .. } => true,
            _ => false,
        }
    }

    /// Returns true for the non-retriable out-of-date condition.
    pub fn is_out_of_date(&self) -> bool {
        matches!(self.root(), SyncError::OutOfDate { .. })
    }
}

/// Attaches a [`SyncStage`] to errors.
pub trait StageExt<T> {
    /// Wraps the error with `stage` unless it already carries one.
    fn stage(self, stage: SyncStage) -> SyncResult<T>;
}

impl<T, E: Into<SyncError>> StageExt<T> for Result<T, E> {
    fn stage(self, stage: SyncStage) -> SyncResult<T> {
        self.map_err(|e| match e.into() {
            staged @ SyncError::Staged { .. } => staged,
            other => SyncError::Staged {
                stage,
                source: Box::new(other),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_is_attached_once() {
        let inner: SyncResult<()> = Err(SyncError::Cancelled);
        let err = inner
            .stage(SyncStage::ChangesSelecting)
            .stage(SyncStage::EndSession)
            .unwrap_err();

        assert_eq!(err.stage(), Some(SyncStage::ChangesSelecting));
        assert!(matches!(err.root(), SyncError::Cancelled));
        assert!(err.to_string().contains("changes_selecting"));
    }

    #[test]
    fn retryable_errors() {
        let transient: SyncResult<()> =
            Err(StoreError::Unavailable("connection reset".into()).into());
        assert!(transient.stage(SyncStage::ChangesApplying).unwrap_err().is_retryable());

        let out_of_date = SyncError::OutOfDate {
            client_id: Uuid::nil(),
            last_sync_timestamp: 1,
            horizon: 5,
        };
        assert!(!out_of_date.is_retryable());
        assert!(out_of_date.is_out_of_date());
        assert!(!SyncError::Cancelled.is_retryable());
        assert!(!StoreError::UnknownTable("t".into()).is_transient());
    }
}
