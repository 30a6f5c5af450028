//! Test fixtures and session helpers.
//!
//! Provides ready-made sync setups and a [`SyncHub`] that wires one server
//! store to any number of client stores.

use scopesync_engine::{
    ApplyChangesRequest, ApplyChangesResponse, CancellationToken, LocalOrchestrator,
    RemoteOrchestrator, SyncError, SyncOptions, SyncResult, SyncSummary, SyncTransport,
};
use scopesync_protocol::{
    ColumnSchema, ColumnType, Row, ScopeInfo, SyncParameters, SyncSetup, TableSchema,
};
use scopesync_store::{MemoryStore, StoreError};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Scope name used by the helpers.
pub const DEFAULT_SCOPE: &str = "default";

/// A single table `item(id, name, qty)`.
pub fn item_setup() -> SyncSetup {
    SyncSetup::new(vec![item_table()]).expect("item setup is valid")
}

/// The `item` table.
pub fn item_table() -> TableSchema {
    TableSchema::new("item")
        .column(ColumnSchema::new("id", ColumnType::Integer).not_null())
        .column(ColumnSchema::new("name", ColumnType::Text))
        .column(ColumnSchema::new("qty", ColumnType::Integer))
        .primary_key(&["id"])
}

/// An `item` row.
pub fn item(id: i64, name: &str, qty: i64) -> Row {
    Row::new().with("id", id).with("name", name).with("qty", qty)
}

/// Parent `customer(id, email unique, name)` and child
/// `order(id, customer_id -> customer.id, total)`.
///
/// The child is listed first so that ordering comes from the foreign key.
pub fn customer_order_setup() -> SyncSetup {
    SyncSetup::new(vec![
        TableSchema::new("order")
            .column(ColumnSchema::new("id", ColumnType::Integer).not_null())
            .column(ColumnSchema::new("customer_id", ColumnType::Integer).not_null())
            .column(ColumnSchema::new("total", ColumnType::Real))
            .primary_key(&["id"])
            .foreign_key("fk_order_customer", &["customer_id"], "customer", &["id"]),
        TableSchema::new("customer")
            .column(ColumnSchema::new("id", ColumnType::Integer).not_null())
            .column(ColumnSchema::new("email", ColumnType::Text).not_null())
            .column(ColumnSchema::new("name", ColumnType::Text))
            .primary_key(&["id"])
            .unique("uq_customer_email", &["email"]),
    ])
    .expect("customer/order setup is valid")
}

/// A `customer` row.
pub fn customer(id: i64, email: &str, name: &str) -> Row {
    Row::new().with("id", id).with("email", email).with("name", name)
}

/// An `order` row.
pub fn order(id: i64, customer_id: i64, total: f64) -> Row {
    Row::new()
        .with("id", id)
        .with("customer_id", customer_id)
        .with("total", total)
}

/// Live rows of a table in key order, values only.
pub fn live_rows(store: &MemoryStore, table: &str) -> Vec<Row> {
    store
        .rows(table)
        .into_iter()
        .filter(|r| !r.metadata.is_tombstone)
        .map(|r| r.row)
        .collect()
}

/// A server store and orchestrator shared by test clients.
pub struct SyncHub {
    /// Tables synchronized.
    pub setup: SyncSetup,
    /// Server data.
    pub store: Arc<MemoryStore>,
    /// Server side of every session.
    pub server: Arc<RemoteOrchestrator>,
}

impl SyncHub {
    /// Creates a hub with default server options.
    pub fn new(setup: SyncSetup) -> Self {
        Self::with_options(setup, SyncOptions::default())
    }

    /// Creates a hub with the given server options.
    pub fn with_options(setup: SyncSetup, options: SyncOptions) -> Self {
        Self::from_server(setup, |store, setup| RemoteOrchestrator::new(store, setup, options))
    }

    /// Creates a hub whose server orchestrator is built by `build`.
    pub fn from_server(
        setup: SyncSetup,
        build: impl FnOnce(Arc<MemoryStore>, SyncSetup) -> RemoteOrchestrator,
    ) -> Self {
        let store = Arc::new(MemoryStore::with_setup(&setup));
        let server = Arc::new(build(Arc::clone(&store), setup.clone()));
        Self {
            setup,
            store,
            server,
        }
    }

    /// A new client with default options.
    pub fn client(&self) -> TestClient {
        self.client_with(SyncOptions::default())
    }

    /// A new client with the given options.
    pub fn client_with(&self, options: SyncOptions) -> TestClient {
        self.client_from(|store, setup| LocalOrchestrator::new(store, setup, options))
    }

    /// A new client whose orchestrator is built by `build`.
    pub fn client_from(
        &self,
        build: impl FnOnce(Arc<MemoryStore>, SyncSetup) -> LocalOrchestrator,
    ) -> TestClient {
        let store = Arc::new(MemoryStore::with_setup(&self.setup));
        let orchestrator = build(Arc::clone(&store), self.setup.clone());
        TestClient {
            store,
            orchestrator,
        }
    }
}

/// A client store and its orchestrator.
pub struct TestClient {
    /// Client data.
    pub store: Arc<MemoryStore>,
    /// Client side of every session.
    pub orchestrator: LocalOrchestrator,
}

impl TestClient {
    /// Runs one session against the hub's server.
    pub fn sync(&self, hub: &SyncHub) -> SyncResult<SyncSummary> {
        self.sync_via(hub.server.as_ref(), &CancellationToken::new())
    }

    /// Runs one session through `transport`.
    pub fn sync_via(
        &self,
        transport: &dyn SyncTransport,
        cancel: &CancellationToken,
    ) -> SyncResult<SyncSummary> {
        self.orchestrator.synchronize(
            DEFAULT_SCOPE,
            &SyncParameters::new(),
            transport,
            cancel,
            &|_| {},
        )
    }

    /// This client's scope record.
    pub fn scope(&self) -> ScopeInfo {
        self.orchestrator
            .scope(DEFAULT_SCOPE)
            .expect("memory store scope access does not fail")
    }
}

/// Transport that fails `ensure_scope` a fixed number of times with a
/// transient store error.
pub struct FlakyTransport<T> {
    inner: T,
    remaining_failures: AtomicU32,
    attempts: AtomicU32,
}

impl<T: SyncTransport> FlakyTransport<T> {
    /// Wraps `inner`, failing its first `failures` sessions.
    pub fn new(inner: T, failures: u32) -> Self {
        Self {
            inner,
            remaining_failures: AtomicU32::new(failures),
            attempts: AtomicU32::new(0),
        }
    }

    /// Sessions started through this transport.
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl<T: SyncTransport> SyncTransport for FlakyTransport<T> {
    fn ensure_scope(&self, scope_name: &str) -> SyncResult<ScopeInfo> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .remaining_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(SyncError::Store(StoreError::Unavailable("connection reset".into())));
        }
        self.inner.ensure_scope(scope_name)
    }

    fn apply_then_get_changes(
        &self,
        request: ApplyChangesRequest<'_>,
    ) -> SyncResult<ApplyChangesResponse> {
        self.inner.apply_then_get_changes(request)
    }

    fn end_session(
        &self,
        scope_name: &str,
        client_id: Uuid,
        server_timestamp: i64,
    ) -> SyncResult<()> {
        self.inner.end_session(scope_name, client_id, server_timestamp)
    }
}

/// Transport that cancels the session right after the server answers.
pub struct CancelAfterUpload<T> {
    inner: T,
    token: CancellationToken,
}

impl<T: SyncTransport> CancelAfterUpload<T> {
    /// Wraps `inner`, cancelling `token` once the upload is applied.
    pub fn new(inner: T, token: CancellationToken) -> Self {
        Self { inner, token }
    }
}

impl<T: SyncTransport> SyncTransport for CancelAfterUpload<T> {
    fn ensure_scope(&self, scope_name: &str) -> SyncResult<ScopeInfo> {
        self.inner.ensure_scope(scope_name)
    }

    fn apply_then_get_changes(
        &self,
        request: ApplyChangesRequest<'_>,
    ) -> SyncResult<ApplyChangesResponse> {
        let response = self.inner.apply_then_get_changes(request);
        self.token.cancel();
        response
    }

    fn end_session(
        &self,
        scope_name: &str,
        client_id: Uuid,
        server_timestamp: i64,
    ) -> SyncResult<()> {
        self.inner.end_session(scope_name, client_id, server_timestamp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setups_order_parents_first() {
        let setup = customer_order_setup();
        let names: Vec<&str> = setup.forward().map(|t| t.name()).collect();
        assert_eq!(names, ["customer", "order"]);
    }

    #[test]
    fn hub_round_trip() {
        let hub = SyncHub::new(item_setup());
        let client = hub.client();
        client.store.insert_local("item", item(1, "bolt", 3)).unwrap();

        client.sync(&hub).unwrap();
        assert_eq!(live_rows(&hub.store, "item"), vec![item(1, "bolt", 3)]);
        assert!(!client.scope().is_new);
    }
}
