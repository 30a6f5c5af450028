//! Scope records.
//!
//! A scope is a named synchronization participant with its own last-sync
//! watermark. Every participant keeps one [`ScopeInfo`] per scope name for
//! itself; the server additionally keeps one [`ScopeInfoClient`] per client it
//! has synchronized with (a "reference scope").

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The local participant's record of a scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeInfo {
    /// Identity of the participant within this scope.
    pub id: Uuid,
    /// Scope name.
    pub name: String,
    /// True until the first synchronization completes.
    pub is_new: bool,
    /// Local store timestamp captured at the last completed sync.
    pub last_sync_timestamp: i64,
    /// Wall-clock time of the last completed sync, for reporting only.
    pub last_sync: Option<DateTime<Utc>>,
}

impl ScopeInfo {
    /// Creates a brand new scope with a random identity.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_id(Uuid::new_v4(), name)
    }

    /// Creates a brand new scope with the given identity.
    pub fn with_id(id: Uuid, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            is_new: true,
            last_sync_timestamp: 0,
            last_sync: None,
        }
    }

    /// Builds the view of a peer that change selection runs against.
    ///
    /// `id` is the peer whose own writes must not be echoed back to it, and
    /// `last_sync_timestamp` is a timestamp of the store being read.
    pub fn requesting(
        id: Uuid,
        name: impl Into<String>,
        last_sync_timestamp: i64,
        is_new: bool,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            is_new,
            last_sync_timestamp,
            last_sync: None,
        }
    }

    /// Records a completed synchronization.
    pub fn mark_synced(&mut self, timestamp: i64, at: DateTime<Utc>) {
        self.is_new = false;
        self.last_sync_timestamp = timestamp;
        self.last_sync = Some(at);
    }
}

/// The server's record of one client within a scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeInfoClient {
    /// Scope name.
    pub scope_name: String,
    /// Identity of the client.
    pub client_id: Uuid,
    /// True until the client's first synchronization completes.
    pub is_new: bool,
    /// Server store timestamp captured at the client's last sync.
    pub last_sync_timestamp: i64,
    /// Wall-clock time of the client's last sync.
    pub last_sync: Option<DateTime<Utc>>,
}

impl ScopeInfoClient {
    /// Creates a reference scope for a client that has never synced.
    pub fn new(scope_name: impl Into<String>, client_id: Uuid) -> Self {
        Self {
            scope_name: scope_name.into(),
            client_id,
            is_new: true,
            last_sync_timestamp: 0,
            last_sync: None,
        }
    }

    /// The requesting scope used to select server changes for this client.
    pub fn as_requesting_scope(&self) -> ScopeInfo {
        ScopeInfo::requesting(
            self.client_id,
            self.scope_name.clone(),
            self.last_sync_timestamp,
            self.is_new,
        )
    }

    /// Records a completed synchronization.
    pub fn mark_synced(&mut self, timestamp: i64, at: DateTime<Utc>) {
        self.is_new = false;
        self.last_sync_timestamp = timestamp;
        self.last_sync = Some(at);
    }
}
