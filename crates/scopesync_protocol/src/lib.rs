//! # ScopeSync Protocol
//!
//! Data types shared by every ScopeSync participant.
//!
//! This crate provides:
//! - `ScopeInfo` and `ScopeInfoClient` sync watermarks
//! - `Row`, `TrackingMetadata` and classified `SyncRow`s
//! - immutable table descriptors and the dependency-ordered `SyncSetup`
//! - conflict classification and resolution types
//! - batch parts and the spool manifest
//! - selection and apply statistics
//!
//! This is a pure data crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod batch;
mod conflict;
mod error;
mod filter;
mod row;
mod scope;
mod schema;
mod stage;
mod stats;

pub use batch::{
    BatchManifest, BatchPart, BatchPartInfo, BatchPartTableInfo, TableChanges,
    BATCH_MANIFEST_VERSION, MANIFEST_FILE_NAME,
};
pub use conflict::{
    ApplyAction, ConflictOutcome, ConflictResolution, ConflictResolutionPolicy, ConflictType,
    LocalRowState, SyncConflict,
};
pub use error::{ManifestError, SetupError, SetupResult};
pub use filter::{RowFilter, SyncParameters};
pub use row::{PrimaryKey, Row, RowState, SyncRow, TrackedRow, TrackingMetadata};
pub use schema::{
    ColumnSchema, ColumnType, ForeignKey, SyncDirection, SyncSetup, TableSchema,
    TableSyncDirection, UniqueConstraint,
};
pub use scope::{ScopeInfo, ScopeInfoClient};
pub use stage::SyncStage;
pub use stats::{
    DatabaseChangesApplied, DatabaseChangesSelected, TableChangesApplied, TableChangesSelected,
};
