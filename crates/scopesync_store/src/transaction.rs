//! Transaction tokens and scoped cleanup guards.

use crate::error::StoreResult;
use crate::store::DataStore;
use serde::{Deserialize, Serialize};

/// Isolation requested for a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum IsolationLevel {
    /// Read committed.
    ReadCommitted,
    /// Repeatable read.
    RepeatableRead,
    /// Snapshot.
    #[default]
    Snapshot,
    /// Serializable.
    Serializable,
}

/// Handle to an open store transaction.
///
/// The store owns the transaction's state; the handle only names it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Transaction {
    id: u64,
    isolation: IsolationLevel,
}

impl Transaction {
    /// Creates a handle. Called by store implementations.
    pub fn new(id: u64, isolation: IsolationLevel) -> Self {
        Self { id, isolation }
    }

    /// Store-assigned identifier.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Requested isolation.
    pub fn isolation(&self) -> IsolationLevel {
        self.isolation
    }
}

/// Rolls the transaction back on drop unless it was committed.
///
/// # Example
///
/// ```rust
/// use scopesync_store::{DataStore, IsolationLevel, MemoryStore, TransactionScope};
///
/// let store = MemoryStore::new();
/// let scope = TransactionScope::begin(&store, IsolationLevel::Snapshot).unwrap();
/// let _ts = store.current_timestamp(scope.txn()).unwrap();
/// scope.commit().unwrap();
/// ```
pub struct TransactionScope<'a> {
    store: &'a dyn DataStore,
    txn: Transaction,
    finished: bool,
}

impl<'a> TransactionScope<'a> {
    /// Begins a transaction on `store`.
    pub fn begin(store: &'a dyn DataStore, isolation: IsolationLevel) -> StoreResult<Self> {
        let txn = store.begin_transaction(isolation)?;
        Ok(Self {
            store,
            txn,
            finished: false,
        })
    }

    /// The open transaction.
    pub fn txn(&self) -> &Transaction {
        &self.txn
    }

    /// Commits, consuming the guard.
    pub fn commit(mut self) -> StoreResult<()> {
        self.finished = true;
        self.store.commit(self.txn)
    }

    /// Rolls back explicitly, consuming the guard.
    pub fn rollback(mut self) -> StoreResult<()> {
        self.finished = true;
        self.store.rollback(self.txn)
    }
}

impl Drop for TransactionScope<'_> {
    fn drop(&mut self) {
        if !self.finished {
            if let Err(e) = self.store.rollback(self.txn) {
                tracing::warn!(txn = self.txn.id(), error = %e, "rollback on drop failed");
            }
        }
    }
}

/// Disables constraint checking for its lifetime.
///
/// Constraints are re-enabled when the guard is released or dropped, on
/// error paths included.
pub struct ConstraintsGuard<'a> {
    store: &'a dyn DataStore,
    txn: Transaction,
    released: bool,
}

impl<'a> ConstraintsGuard<'a> {
    /// Disables constraints inside `txn`.
    pub fn disable(store: &'a dyn DataStore, txn: &Transaction) -> StoreResult<Self> {
        store.disable_constraints(txn)?;
        Ok(Self {
            store,
            txn: *txn,
            released: false,
        })
    }

    /// Re-enables constraints and reports failure.
    pub fn release(mut self) -> StoreResult<()> {
        self.released = true;
        self.store.enable_constraints(&self.txn)
    }
}

impl Drop for ConstraintsGuard<'_> {
    fn drop(&mut self) {
        if !self.released {
            if let Err(e) = self.store.enable_constraints(&self.txn) {
                tracing::warn!(txn = self.txn.id(), error = %e, "re-enabling constraints failed");
            }
        }
    }
}
