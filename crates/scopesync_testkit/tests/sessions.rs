//! Full client/server sessions over the in-process transport.

use scopesync_engine::{
    ApplyChangesRequest, ApplyChangesResponse, CancellationToken, ConflictArgs, LocalOrchestrator,
    RemoteOrchestrator, RetryPolicy, SyncAgent, SyncError, SyncOptions, SyncResult, SyncState,
    SyncSummary, SyncTransport, TransactionMode,
};
use scopesync_protocol::{
    ConflictResolution, ConflictResolutionPolicy, PrimaryKey, ScopeInfo, SyncStage,
};
use scopesync_store::{DataStore, FailPoint};
use scopesync_testkit::prelude::*;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

#[test]
fn changes_flow_both_ways() {
    let hub = SyncHub::new(item_setup());
    let client = hub.client();
    hub.store.insert_local("item", item(1, "from server", 1)).unwrap();
    client.store.insert_local("item", item(2, "from client", 2)).unwrap();

    let summary = client.sync(&hub).unwrap();
    assert_eq!(summary.upload_applied.total_applied(), 1);
    assert_eq!(summary.total_failed(), 0);

    let expected = vec![item(1, "from server", 1), item(2, "from client", 2)];
    assert_eq!(live_rows(&hub.store, "item"), expected);
    assert_eq!(live_rows(&client.store, "item"), expected);

    // Nothing moves in a second session.
    let again = client.sync(&hub).unwrap();
    assert_eq!(again.upload_selected.total(), 0);
    assert_eq!(again.download_selected.total(), 0);
}

#[test]
fn own_writes_come_back_only_on_the_first_session() {
    let hub = SyncHub::new(item_setup());
    let client = hub.client();
    client.store.insert_local("item", item(1, "mine", 1)).unwrap();

    let first = client.sync(&hub).unwrap();
    assert_eq!(first.upload_applied.total_applied(), 1);
    assert_eq!(first.download_selected.total(), 1);

    client.store.update_local("item", item(1, "mine", 2)).unwrap();
    let second = client.sync(&hub).unwrap();
    assert_eq!(second.upload_applied.total_applied(), 1);
    assert_eq!(second.download_selected.total(), 0);
    assert_eq!(live_rows(&hub.store, "item"), vec![item(1, "mine", 2)]);
}

#[test]
fn updates_and_deletes_reach_other_clients() {
    let hub = SyncHub::new(item_setup());
    let a = hub.client();
    let b = hub.client();
    a.store.insert_local("item", item(1, "one", 1)).unwrap();
    b.store.insert_local("item", item(2, "two", 2)).unwrap();
    a.sync(&hub).unwrap();
    b.sync(&hub).unwrap();
    a.sync(&hub).unwrap();
    assert_eq!(live_rows(&a.store, "item"), live_rows(&b.store, "item"));

    b.store.delete_local("item", &PrimaryKey::single(1)).unwrap();
    b.store.update_local("item", item(2, "two", 20)).unwrap();
    let summary = b.sync(&hub).unwrap();
    assert_eq!(summary.upload_selected.total_deletes(), 1);
    assert_eq!(summary.upload_selected.total_updates(), 1);

    let summary = a.sync(&hub).unwrap();
    assert_eq!(summary.download_applied.total_applied(), 2);
    assert_eq!(live_rows(&a.store, "item"), vec![item(2, "two", 20)]);
    assert_eq!(live_rows(&hub.store, "item"), vec![item(2, "two", 20)]);
}

#[test]
fn server_wins_concurrent_edit_on_both_sides() {
    let hub = SyncHub::new(item_setup());
    let client = hub.client();
    hub.store.insert_local("item", item(1, "base", 0)).unwrap();
    client.sync(&hub).unwrap();

    hub.store.update_local("item", item(1, "server", 1)).unwrap();
    client.store.update_local("item", item(1, "client", 2)).unwrap();
    let summary = client.sync(&hub).unwrap();

    assert_eq!(summary.upload_applied.total_resolved_conflicts(), 1);
    assert_eq!(summary.download_applied.total_applied(), 1);
    assert_eq!(live_rows(&hub.store, "item"), vec![item(1, "server", 1)]);
    assert_eq!(live_rows(&client.store, "item"), vec![item(1, "server", 1)]);
}

#[test]
fn client_wins_concurrent_edit_on_both_sides() {
    let options = SyncOptions::default()
        .with_conflict_resolution_policy(ConflictResolutionPolicy::ClientWins);
    let hub = SyncHub::with_options(item_setup(), options.clone());
    let client = hub.client_with(options);
    hub.store.insert_local("item", item(1, "base", 0)).unwrap();
    client.sync(&hub).unwrap();

    hub.store.update_local("item", item(1, "server", 1)).unwrap();
    client.store.update_local("item", item(1, "client", 2)).unwrap();
    let summary = client.sync(&hub).unwrap();

    assert_eq!(summary.upload_applied.total_applied(), 1);
    assert_eq!(live_rows(&hub.store, "item"), vec![item(1, "client", 2)]);
    assert_eq!(live_rows(&client.store, "item"), vec![item(1, "client", 2)]);

    // The forced row is not sent back to its author.
    let again = client.sync(&hub).unwrap();
    assert_eq!(again.download_selected.total(), 0);
}

#[test]
fn interceptor_merges_on_the_server() {
    let hub = SyncHub::from_server(item_setup(), |store, setup| {
        RemoteOrchestrator::new(store, setup, SyncOptions::default()).with_interceptor(
            |args: &mut ConflictArgs<'_>| {
                let conflict = args.conflict;
                let (Some(local), Some(remote)) = (&conflict.local_row, &conflict.remote_row) else {
                    return;
                };
                let mut merged = remote.clone();
                if let Some(qty) = local.get("qty") {
                    merged.set("qty", qty.clone());
                }
                args.resolution = ConflictResolution::MergeRow;
                args.final_row = Some(merged);
            },
        )
    });
    let client = hub.client();
    hub.store.insert_local("item", item(1, "base", 0)).unwrap();
    client.sync(&hub).unwrap();

    hub.store.update_local("item", item(1, "base", 5)).unwrap();
    client.store.update_local("item", item(1, "renamed", 1)).unwrap();
    client.sync(&hub).unwrap();

    assert_eq!(live_rows(&hub.store, "item"), vec![item(1, "renamed", 5)]);
    assert_eq!(live_rows(&client.store, "item"), vec![item(1, "renamed", 5)]);
}

#[test]
fn interceptor_rollback_counts_a_failed_row() {
    let hub = SyncHub::from_server(item_setup(), |store, setup| {
        RemoteOrchestrator::new(store, setup, SyncOptions::default())
            .with_interceptor(|args: &mut ConflictArgs<'_>| {
                args.resolution = ConflictResolution::Rollback
            })
    });
    let client = hub.client();
    hub.store.insert_local("item", item(1, "base", 0)).unwrap();
    client.sync(&hub).unwrap();

    hub.store.update_local("item", item(1, "server", 1)).unwrap();
    client.store.update_local("item", item(1, "client", 2)).unwrap();
    let summary = client.sync(&hub).unwrap();

    assert_eq!(summary.upload_applied.total_failed(), 1);
    assert_eq!(live_rows(&hub.store, "item"), vec![item(1, "server", 1)]);
}

#[test]
fn unique_collision_is_kept_out_of_the_server() {
    let hub = SyncHub::new(customer_order_setup());
    let client = hub.client();
    client.sync(&hub).unwrap();

    hub.store.insert_local("customer", customer(1, "same@example.com", "Server")).unwrap();
    client.store.insert_local("customer", customer(2, "same@example.com", "Client")).unwrap();
    let summary = client.sync(&hub).unwrap();

    assert_eq!(summary.upload_applied.total_resolved_conflicts(), 1);
    assert_eq!(summary.download_applied.total_failed(), 1);
    assert_eq!(
        live_rows(&hub.store, "customer"),
        vec![customer(1, "same@example.com", "Server")]
    );
}

#[test]
fn parent_and_child_changes_apply_in_dependency_order() {
    let hub = SyncHub::new(customer_order_setup());
    let client = hub.client();
    hub.store.insert_local("customer", customer(1, "old@example.com", "Old")).unwrap();
    hub.store.insert_local("order", order(10, 1, 5.0)).unwrap();
    client.sync(&hub).unwrap();
    assert_eq!(client.store.live_row_count("order"), 1);

    hub.store.delete_local("order", &PrimaryKey::single(10)).unwrap();
    hub.store.delete_local("customer", &PrimaryKey::single(1)).unwrap();
    hub.store.insert_local("customer", customer(2, "new@example.com", "New")).unwrap();
    hub.store.insert_local("order", order(20, 2, 7.5)).unwrap();

    let summary = client.sync(&hub).unwrap();
    assert_eq!(summary.total_failed(), 0);
    assert_eq!(summary.download_applied.total_applied(), 4);
    assert_eq!(live_rows(&client.store, "customer"), vec![customer(2, "new@example.com", "New")]);
    assert_eq!(live_rows(&client.store, "order"), vec![order(20, 2, 7.5)]);
}

#[test]
fn concurrent_session_on_one_scope_is_rejected() {
    let hub = SyncHub::new(item_setup());
    let client = hub.client();
    let _held = client.orchestrator.locks().acquire(DEFAULT_SCOPE).unwrap();

    let err = client.sync(&hub).unwrap_err();
    assert!(matches!(err.root(), SyncError::SessionInProgress { .. }));
    assert_eq!(err.stage(), Some(SyncStage::BeginSession));
    assert!(client.scope().is_new);
}

#[test]
fn cancelled_download_leaves_watermarks_and_resends() {
    let hub = SyncHub::new(item_setup());
    let client = hub.client();
    client.store.insert_local("item", item(1, "a", 1)).unwrap();
    hub.store.insert_local("item", item(2, "b", 2)).unwrap();

    let token = CancellationToken::new();
    let transport = CancelAfterUpload::new(Arc::clone(&hub.server), token.clone());
    let err = client.sync_via(&transport, &token).unwrap_err();
    assert!(matches!(err.root(), SyncError::Cancelled));
    assert!(client.scope().is_new);
    assert!(hub
        .store
        .read_client_scope(DEFAULT_SCOPE, client.scope().id)
        .unwrap()
        .is_none());
    assert_eq!(client.store.live_row_count("item"), 1);
    assert_eq!(client.store.active_transactions(), 0);

    let summary = client.sync(&hub).unwrap();
    assert_eq!(summary.upload_selected.total(), 1);
    assert_eq!(live_rows(&client.store, "item"), live_rows(&hub.store, "item"));
    assert_eq!(hub.store.live_row_count("item"), 2);
}

#[test]
fn purged_tombstones_make_a_client_out_of_date() {
    let hub = SyncHub::new(item_setup());
    let client = hub.client();
    client.sync(&hub).unwrap();

    hub.store.insert_local("item", item(1, "short lived", 1)).unwrap();
    hub.store.delete_local("item", &PrimaryKey::single(1)).unwrap();
    assert_eq!(hub.store.purge_tombstones(hub.store.clock()), 1);

    let err = client.sync(&hub).unwrap_err();
    assert!(err.is_out_of_date());
    assert!(!err.is_retryable());

    // A client that never synced is unaffected.
    let fresh = hub.client();
    fresh.sync(&hub).unwrap();
}

#[test]
fn per_table_mode_keeps_committed_tables() {
    let options = SyncOptions::default().with_transaction_mode(TransactionMode::PerTable);
    let hub = SyncHub::with_options(customer_order_setup(), options);
    let client = hub.client();
    client.store.insert_local("customer", customer(1, "a@example.com", "A")).unwrap();
    client.store.insert_local("order", order(10, 1, 3.0)).unwrap();

    hub.store.arm(FailPoint::WriteTable("order".to_string()));
    let err = client.sync(&hub).unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(hub.store.live_row_count("customer"), 1);
    assert_eq!(hub.store.live_row_count("order"), 0);

    client.sync(&hub).unwrap();
    assert_eq!(hub.store.live_row_count("order"), 1);
    assert_eq!(live_rows(&client.store, "customer"), live_rows(&hub.store, "customer"));
}

#[test]
fn all_or_nothing_mode_rolls_back_every_table() {
    let options = SyncOptions::default().with_disable_constraints_on_apply(true);
    let hub = SyncHub::with_options(customer_order_setup(), options);
    let client = hub.client();
    client.store.insert_local("customer", customer(1, "a@example.com", "A")).unwrap();
    client.store.insert_local("order", order(10, 1, 3.0)).unwrap();

    hub.store.arm(FailPoint::WriteTable("order".to_string()));
    client.sync(&hub).unwrap_err();
    assert_eq!(hub.store.live_row_count("customer"), 0);
    assert!(hub.store.constraints_enabled());
    assert_eq!(hub.store.active_transactions(), 0);
}

#[test]
fn agent_retries_transient_failures() {
    let hub = SyncHub::new(item_setup());
    let TestClient { store, orchestrator } = hub.client();
    store.insert_local("item", item(1, "a", 1)).unwrap();

    let transport = FlakyTransport::new(Arc::clone(&hub.server), 2);
    let agent = SyncAgent::new(orchestrator, transport, DEFAULT_SCOPE)
        .with_retry(RetryPolicy::new(3).with_initial_delay(Duration::from_millis(1)));

    let summary = agent.sync_with_retry().unwrap();
    assert_eq!(agent.transport().attempts(), 3);
    assert_eq!(agent.state(), SyncState::Synced);
    assert_eq!(agent.last_summary(), Some(summary));
    assert!(agent.last_error().is_none());
    assert_eq!(hub.store.live_row_count("item"), 1);
}

#[test]
fn agent_gives_up_after_max_attempts() {
    let hub = SyncHub::new(item_setup());
    let TestClient { orchestrator, .. } = hub.client();

    let transport = FlakyTransport::new(Arc::clone(&hub.server), 5);
    let agent = SyncAgent::new(orchestrator, transport, DEFAULT_SCOPE)
        .with_retry(RetryPolicy::new(2).with_initial_delay(Duration::from_millis(1)));

    assert!(agent.sync_with_retry().is_err());
    assert_eq!(agent.transport().attempts(), 2);
    assert_eq!(agent.state(), SyncState::Error);
    assert!(agent.last_error().unwrap().contains("connection reset"));
}

/// Transport that runs another orchestrator's session on the same scope
/// while the server applies the upload.
struct SyncsDuringUpload<'a> {
    server: &'a RemoteOrchestrator,
    other: &'a LocalOrchestrator,
    outcome: Mutex<Option<SyncResult<SyncSummary>>>,
}

impl SyncTransport for SyncsDuringUpload<'_> {
    fn ensure_scope(&self, scope_name: &str) -> SyncResult<ScopeInfo> {
        self.server.ensure_scope(scope_name)
    }

    fn apply_then_get_changes(
        &self,
        request: ApplyChangesRequest<'_>,
    ) -> SyncResult<ApplyChangesResponse> {
        let nested = self.other.synchronize(
            request.scope_name,
            &Default::default(),
            self.server as &dyn SyncTransport,
            &CancellationToken::new(),
            &|_| {},
        );
        *self.outcome.lock().unwrap() = Some(nested);
        self.server.apply_then_get_changes(request)
    }

    fn end_session(
        &self,
        scope_name: &str,
        client_id: Uuid,
        server_timestamp: i64,
    ) -> SyncResult<()> {
        self.server.end_session(scope_name, client_id, server_timestamp)
    }
}

#[test]
fn orchestrators_of_one_store_exclude_each_other() {
    let hub = SyncHub::new(item_setup());
    let first = hub.client();
    let second =
        LocalOrchestrator::new(first.store.clone(), hub.setup.clone(), SyncOptions::default());
    first.store.insert_local("item", item(1, "a", 1)).unwrap();

    let transport = SyncsDuringUpload {
        server: hub.server.as_ref(),
        other: &second,
        outcome: Mutex::new(None),
    };
    first.sync_via(&transport, &CancellationToken::new()).unwrap();

    let nested = transport.outcome.lock().unwrap().take().unwrap();
    let err = nested.unwrap_err();
    assert!(matches!(err.root(), SyncError::SessionInProgress { .. }));
    assert_eq!(err.stage(), Some(SyncStage::BeginSession));
    assert!(first.store.claimed_sessions().is_empty());

    // The released claim lets the other orchestrator run, and its watermark
    // only moves forward.
    let watermark = first.scope().last_sync_timestamp;
    first.store.insert_local("item", item(2, "b", 2)).unwrap();
    let summary = second
        .synchronize(
            DEFAULT_SCOPE,
            &Default::default(),
            hub.server.as_ref() as &dyn SyncTransport,
            &CancellationToken::new(),
            &|_| {},
        )
        .unwrap();
    assert_eq!(summary.upload_applied.total_applied(), 1);
    assert!(first.scope().last_sync_timestamp > watermark);
    assert_eq!(live_rows(&hub.store, "item"), vec![item(1, "a", 1), item(2, "b", 2)]);
}

#[test]
fn spooled_sessions_with_mixed_codecs_converge() {
    use scopesync_codec::CodecKind;

    let root = tempfile::TempDir::new().unwrap();
    let spooled = |codec| {
        SyncOptions::default()
            .with_batch_size(96)
            .with_codec(codec)
            .with_batch_directory(root.path())
    };
    let hub = SyncHub::with_options(item_setup(), spooled(CodecKind::Cbor));
    let a = hub.client_with(spooled(CodecKind::Json));
    let b = hub.client_with(spooled(CodecKind::Cbor));
    for id in 0..20 {
        a.store.insert_local("item", item(id, "from a", id)).unwrap();
        b.store.insert_local("item", item(100 + id, "from b", id)).unwrap();
    }

    a.sync(&hub).unwrap();
    b.sync(&hub).unwrap();
    a.sync(&hub).unwrap();

    assert_eq!(hub.store.live_row_count("item"), 40);
    assert_eq!(live_rows(&a.store, "item"), live_rows(&hub.store, "item"));
    assert_eq!(live_rows(&b.store, "item"), live_rows(&hub.store, "item"));
    assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
}
