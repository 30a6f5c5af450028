//! Scope records and per-scope session guards.

use crate::error::{SyncError, SyncResult};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use scopesync_protocol::{ScopeInfo, ScopeInfoClient};
use scopesync_store::DataStore;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Loads and persists scope watermarks through a data store.
///
/// Creation and watermark advances of this participant's own scope are
/// serialized, so concurrent sessions agree on one scope identity.
#[derive(Clone)]
pub struct ScopeTracker {
    store: Arc<dyn DataStore>,
    writes: Arc<Mutex<()>>,
}

impl ScopeTracker {
    /// Creates a tracker over `store`.
    pub fn new(store: Arc<dyn DataStore>) -> Self {
        Self {
            store,
            writes: Arc::new(Mutex::new(())),
        }
    }

    /// Loads this participant's scope, creating and persisting it on first use.
    pub fn load_or_create(&self, name: &str) -> SyncResult<ScopeInfo> {
        let _writing = self.writes.lock();
        self.load_or_create_locked(name)
    }

    fn load_or_create_locked(&self, name: &str) -> SyncResult<ScopeInfo> {
        if let Some(scope) = self.store.read_scope(name)? {
            return Ok(scope);
        }
        let scope = ScopeInfo::new(name);
        self.store.write_scope(&scope)?;
        tracing::info!(scope = name, id = %scope.id, "created scope");
        Ok(scope)
    }

    /// Loads a client's reference scope, or a fresh one if the client is new.
    ///
    /// A fresh reference scope is persisted only once the client completes
    /// a session.
    pub fn load_or_new_client(&self, name: &str, client_id: Uuid) -> SyncResult<ScopeInfoClient> {
        Ok(self
            .store
            .read_client_scope(name, client_id)?
            .unwrap_or_else(|| ScopeInfoClient::new(name, client_id)))
    }

    /// Moves this participant's watermark forward to `timestamp`, never back.
    pub fn advance(&self, name: &str, timestamp: i64, at: DateTime<Utc>) -> SyncResult<ScopeInfo> {
        let _writing = self.writes.lock();
        let mut scope = self.load_or_create_locked(name)?;
        scope.mark_synced(timestamp.max(scope.last_sync_timestamp), at);
        self.store.write_scope(&scope)?;
        Ok(scope)
    }

    /// Persists a client's reference scope.
    pub fn save_client(&self, scope: &ScopeInfoClient) -> SyncResult<()> {
        self.store.write_client_scope(scope)?;
        Ok(())
    }
}

/// Session guards over one store.
///
/// Claims live in the store, so every orchestrator over the same store sees
/// them whether or not it shares this value.
pub struct ScopeLocks {
    store: Arc<dyn DataStore>,
}

impl fmt::Debug for ScopeLocks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopeLocks").finish_non_exhaustive()
    }
}

impl ScopeLocks {
    /// Creates guards over `store`.
    pub fn new(store: Arc<dyn DataStore>) -> Arc<Self> {
        Arc::new(Self { store })
    }

    /// Claims `key`, failing if a session already holds it.
    pub fn acquire(self: &Arc<Self>, key: impl Into<String>) -> SyncResult<ScopeGuard> {
        let key = key.into();
        if !self.store.try_claim_session(&key)? {
            return Err(SyncError::SessionInProgress { scope: key });
        }
        Ok(ScopeGuard {
            locks: Arc::clone(self),
            key,
        })
    }
}

/// Token proving a session holds its scope. Released on drop.
#[derive(Debug)]
pub struct ScopeGuard {
    locks: Arc<ScopeLocks>,
    key: String,
}

impl ScopeGuard {
    /// The held key.
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        if let Err(e) = self.locks.store.release_session(&self.key) {
            tracing::warn!(key = %self.key, error = %e, "failed to release session claim");
        }
    }
}
