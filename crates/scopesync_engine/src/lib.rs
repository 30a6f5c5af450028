//! # ScopeSync Engine
//!
//! Change tracking, selection, batching, application and conflict
//! resolution for bidirectional scope-based sync.
//!
//! This crate provides:
//! - Row classification against a requesting scope ([`RowVersionOracle`])
//! - Change selection in dependency order ([`ChangeEnumerator`])
//! - Size-bounded batches, spooled to disk when bounded ([`BatchAccumulator`])
//! - Optimistic change application ([`ChangeApplier`])
//! - Conflict resolution with an interceptor hook ([`ConflictResolver`])
//! - Client and server session orchestration and a retrying [`SyncAgent`]
//!
//! ## Architecture
//!
//! A session is **upload-then-download**:
//! 1. The client selects rows changed since its watermark
//! 2. The server applies them, resolving conflicts with the session policy
//! 3. The server selects rows changed since the client's reference watermark
//! 4. The client applies them with the reversed policy
//! 5. Both sides advance their watermarks
//!
//! ## Key Invariants
//!
//! - Classification is a pure function of tracking metadata and scope
//! - After its first session, a participant never receives its own writes back
//! - Deletes are applied children first, upserts parents first
//! - Constraints disabled for an apply pass are always re-enabled
//! - One session per scope at a time
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use scopesync_engine::{CancellationToken, LocalOrchestrator, RemoteOrchestrator, SyncOptions};
//! use scopesync_protocol::{ColumnSchema, ColumnType, Row, SyncParameters, SyncSetup, TableSchema};
//! use scopesync_store::MemoryStore;
//!
//! let setup = SyncSetup::new(vec![TableSchema::new("note")
//!     .column(ColumnSchema::new("id", ColumnType::Integer).not_null())
//!     .column(ColumnSchema::new("body", ColumnType::Text))
//!     .primary_key(&["id"])])
//! .unwrap();
//!
//! let server_store = Arc::new(MemoryStore::with_setup(&setup));
//! let client_store = Arc::new(MemoryStore::with_setup(&setup));
//! client_store.insert_local("note", Row::new().with("id", 1).with("body", "hello")).unwrap();
//!
//! let options = SyncOptions::default();
//! let server = RemoteOrchestrator::new(server_store.clone(), setup.clone(), options.clone());
//! let client = LocalOrchestrator::new(client_store, setup, options);
//! let summary = client
//!     .synchronize("default", &SyncParameters::new(), &server, &CancellationToken::new(), &|_| {})
//!     .unwrap();
//!
//! assert_eq!(summary.upload_applied.total_applied(), 1);
//! assert_eq!(server_store.live_row_count("note"), 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod applier;
mod batch;
mod cancel;
mod config;
mod enumerator;
mod error;
mod oracle;
mod orchestrator;
mod resolver;
mod scope;
mod state;
mod transport;

pub use applier::{ApplyContext, ApplyPhase, ChangeApplier};
pub use batch::{BatchAccumulator, BatchInfo, BatchParts};
pub use cancel::CancellationToken;
pub use config::{ErrorPolicy, RetryPolicy, SyncOptions, TransactionMode};
pub use enumerator::ChangeEnumerator;
pub use error::{StageExt, SyncError, SyncResult};
pub use oracle::{classify, RowVersionOracle};
pub use orchestrator::{LocalOrchestrator, RemoteOrchestrator};
pub use resolver::{apply_outcome, ConflictArgs, ConflictInterceptor, ConflictResolver, RowOutcome};
pub use scope::{ScopeGuard, ScopeLocks, ScopeTracker};
pub use state::{SyncAgent, SyncState, SyncSummary};
pub use transport::{ApplyChangesRequest, ApplyChangesResponse, SyncTransport};
