//! # ScopeSync Store
//!
//! The data store capability the sync engine runs against.
//!
//! The engine never talks to a database driver directly. It reads tracked
//! rows, writes rows under an optimistic-concurrency predicate and persists
//! scope watermarks through the [`DataStore`] trait.
//!
//! ## Design Principles
//!
//! - A refused write is a value ([`Rejection`]), not an error
//! - Timestamps are opaque, strictly increasing store values
//! - Transactions and disabled constraints are released by RAII guards
//! - Must be `Send + Sync` so sessions on different scopes can share a store
//!
//! ## Available Stores
//!
//! - [`MemoryStore`] - complete in-memory reference backend with fault injection
//!
//! ## Example
//!
//! ```rust
//! use scopesync_protocol::{ColumnSchema, ColumnType, Row, TableSchema};
//! use scopesync_store::{
//!     DataStore, IsolationLevel, MemoryStore, TransactionScope, WriteOp, WriteRequest,
//! };
//!
//! let table = TableSchema::new("item")
//!     .column(ColumnSchema::new("id", ColumnType::Integer).not_null())
//!     .primary_key(&["id"]);
//! let store = MemoryStore::new();
//! store.create_table(table.clone());
//!
//! let scope = TransactionScope::begin(&store, IsolationLevel::Snapshot).unwrap();
//! let request = WriteRequest::new(WriteOp::Insert, Row::new().with("id", 1), 0, None);
//! assert!(store.write_row(scope.txn(), &table, &request).unwrap().is_ok());
//! scope.commit().unwrap();
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod memory;
mod outcome;
mod store;
mod transaction;

pub use error::{StoreError, StoreResult};
pub use memory::{FailPoint, MemoryStore};
pub use outcome::{Applied, Rejection, WriteOp, WriteOutcome, WriteRequest};
pub use store::{DataStore, RowStream};
pub use transaction::{ConstraintsGuard, IsolationLevel, Transaction, TransactionScope};
