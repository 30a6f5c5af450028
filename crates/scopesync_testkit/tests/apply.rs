//! Applying classified rows: optimistic writes, conflicts, ordering.

use scopesync_codec::CodecKind;
use scopesync_engine::{
    classify, ApplyContext, BatchAccumulator, BatchInfo, CancellationToken, ChangeApplier,
    ConflictResolver, ErrorPolicy, SyncError, SyncOptions,
};
use scopesync_protocol::{
    ConflictResolutionPolicy, PrimaryKey, Row, RowState, ScopeInfo, SyncRow, TrackingMetadata,
};
use scopesync_store::{FailPoint, MemoryStore};
use scopesync_testkit::prelude::*;
use uuid::Uuid;

fn batch(table: &str, rows: Vec<SyncRow>) -> BatchInfo {
    let mut acc = BatchAccumulator::unbounded(Uuid::new_v4(), CodecKind::Cbor);
    acc.add_rows(table, rows).unwrap();
    acc.finalize().unwrap()
}

fn seeded(update_timestamp: i64) -> MemoryStore {
    let store = MemoryStore::with_setup(&item_setup());
    store
        .seed_row(
            "item",
            item(1, "local", 1),
            TrackingMetadata {
                create_scope_id: None,
                update_scope_id: None,
                create_timestamp: 40,
                update_timestamp,
                is_tombstone: false,
            },
        )
        .unwrap();
    store
}

fn tombstoned(update_timestamp: i64) -> MemoryStore {
    let store = MemoryStore::with_setup(&item_setup());
    store
        .seed_row(
            "item",
            item(1, "gone", 0),
            TrackingMetadata {
                create_scope_id: None,
                update_scope_id: None,
                create_timestamp: 40,
                update_timestamp,
                is_tombstone: true,
            },
        )
        .unwrap();
    store
}

fn from_b(policy: ConflictResolutionPolicy) -> ApplyContext {
    ApplyContext {
        sender_scope_id: SCOPE_B,
        last_known_timestamp: 100,
        policy,
    }
}

#[test]
fn newer_remote_row_is_classified_and_applied() {
    let scope_a = ScopeInfo::requesting(SCOPE_A, DEFAULT_SCOPE, 100, false);
    let remote_meta = TrackingMetadata {
        create_scope_id: None,
        update_scope_id: Some(SCOPE_B),
        create_timestamp: 50,
        update_timestamp: 150,
        is_tombstone: false,
    };
    assert_eq!(classify(&remote_meta, &scope_a), RowState::Updated);

    let store = seeded(90);
    let setup = item_setup();
    let options = SyncOptions::default();
    let resolver = ConflictResolver::new();
    let applied = ChangeApplier::new(&store, &setup, &options, &resolver)
        .apply(
            &batch("item", vec![SyncRow::new(RowState::Updated, item(1, "remote", 2))]),
            from_b(ConflictResolutionPolicy::ServerWins),
            &CancellationToken::new(),
        )
        .unwrap();

    assert_eq!(applied.total_applied(), 1);
    assert_eq!(applied.total_resolved_conflicts(), 0);
    let row = store.get("item", &PrimaryKey::single(1)).unwrap();
    assert_eq!(row.row, item(1, "remote", 2));
    assert_eq!(row.metadata.update_scope_id, Some(SCOPE_B));
    assert!(row.metadata.update_timestamp > 90);
    assert_eq!(row.metadata.create_timestamp, 40);
}

#[test]
fn concurrent_local_edit_keeps_local_row_when_destination_wins() {
    let store = seeded(120);
    let setup = item_setup();
    let options = SyncOptions::default();
    let resolver = ConflictResolver::new();
    let applied = ChangeApplier::new(&store, &setup, &options, &resolver)
        .apply(
            &batch("item", vec![SyncRow::new(RowState::Updated, item(1, "remote", 2))]),
            from_b(ConflictResolutionPolicy::ServerWins),
            &CancellationToken::new(),
        )
        .unwrap();

    assert_eq!(applied.total_resolved_conflicts(), 1);
    assert_eq!(applied.total_applied(), 0);
    let row = store.get("item", &PrimaryKey::single(1)).unwrap();
    assert_eq!(row.row, item(1, "local", 1));
    assert_eq!(row.metadata.update_timestamp, 120);
}

#[test]
fn concurrent_local_edit_is_overwritten_when_sender_wins() {
    let store = seeded(120);
    let setup = item_setup();
    let options = SyncOptions::default();
    let resolver = ConflictResolver::new();
    let applied = ChangeApplier::new(&store, &setup, &options, &resolver)
        .apply(
            &batch("item", vec![SyncRow::new(RowState::Updated, item(1, "remote", 2))]),
            from_b(ConflictResolutionPolicy::ClientWins),
            &CancellationToken::new(),
        )
        .unwrap();

    assert_eq!(applied.total_applied(), 1);
    assert_eq!(applied.table("item").unwrap().updates, 1);
    let row = store.get("item", &PrimaryKey::single(1)).unwrap();
    assert_eq!(row.row, item(1, "remote", 2));
    assert_eq!(row.metadata.update_scope_id, Some(SCOPE_B));

    // The forced write is the sender's own version now.
    let sender = ScopeInfo::requesting(SCOPE_B, DEFAULT_SCOPE, store.clock(), false);
    assert_eq!(classify(&row.metadata, &sender), RowState::Unchanged);
}

#[test]
fn remote_delete_of_locally_updated_row() {
    let setup = item_setup();
    let options = SyncOptions::default();
    let resolver = ConflictResolver::new();
    let delete = || {
        let key = item(1, "remote", 0).project(&["id".to_string()]);
        batch("item", vec![SyncRow::new(RowState::Deleted, key)])
    };

    let kept = seeded(120);
    let applied = ChangeApplier::new(&kept, &setup, &options, &resolver)
        .apply(&delete(), from_b(ConflictResolutionPolicy::ServerWins), &CancellationToken::new())
        .unwrap();
    assert_eq!(applied.total_resolved_conflicts(), 1);
    assert_eq!(kept.live_row_count("item"), 1);

    let removed = seeded(120);
    let applied = ChangeApplier::new(&removed, &setup, &options, &resolver)
        .apply(&delete(), from_b(ConflictResolutionPolicy::ClientWins), &CancellationToken::new())
        .unwrap();
    assert_eq!(applied.table("item").unwrap().deletes, 1);
    let tombstone = removed.get("item", &PrimaryKey::single(1)).unwrap();
    assert!(tombstone.metadata.is_tombstone);
    assert_eq!(tombstone.metadata.update_scope_id, Some(SCOPE_B));
}

#[test]
fn remote_update_of_locally_deleted_row_keeps_tombstone_when_destination_wins() {
    let store = tombstoned(120);
    let setup = item_setup();
    let options = SyncOptions::default();
    let resolver = ConflictResolver::new();
    let applied = ChangeApplier::new(&store, &setup, &options, &resolver)
        .apply(
            &batch("item", vec![SyncRow::new(RowState::Updated, item(1, "remote", 2))]),
            from_b(ConflictResolutionPolicy::ServerWins),
            &CancellationToken::new(),
        )
        .unwrap();

    assert_eq!(applied.total_resolved_conflicts(), 1);
    assert_eq!(applied.total_applied(), 0);
    let row = store.get("item", &PrimaryKey::single(1)).unwrap();
    assert!(row.metadata.is_tombstone);
    assert_eq!(row.metadata.update_timestamp, 120);
    assert_eq!(store.live_row_count("item"), 0);
}

#[test]
fn remote_update_of_locally_deleted_row_recreates_it_when_sender_wins() {
    let store = tombstoned(120);
    let setup = item_setup();
    let options = SyncOptions::default();
    let resolver = ConflictResolver::new();
    let applied = ChangeApplier::new(&store, &setup, &options, &resolver)
        .apply(
            &batch("item", vec![SyncRow::new(RowState::Updated, item(1, "remote", 2))]),
            from_b(ConflictResolutionPolicy::ClientWins),
            &CancellationToken::new(),
        )
        .unwrap();

    assert_eq!(applied.table("item").unwrap().inserts, 1);
    let row = store.get("item", &PrimaryKey::single(1)).unwrap();
    assert!(!row.metadata.is_tombstone);
    assert_eq!(row.row, item(1, "remote", 2));
    assert_eq!(row.metadata.create_scope_id, Some(SCOPE_B));
    assert_eq!(row.metadata.update_scope_id, Some(SCOPE_B));

    let sender = ScopeInfo::requesting(SCOPE_B, DEFAULT_SCOPE, store.clock(), false);
    assert_eq!(classify(&row.metadata, &sender), RowState::Unchanged);
}

#[test]
fn unique_collision_fails_even_when_forced() {
    let setup = customer_order_setup();
    let store = MemoryStore::with_setup(&setup);
    store.insert_local("customer", customer(1, "a@example.com", "Local")).unwrap();
    let collision = || {
        let row = customer(2, "a@example.com", "Remote");
        batch("customer", vec![SyncRow::new(RowState::Inserted, row)])
    };
    let ctx = ApplyContext {
        sender_scope_id: SCOPE_B,
        last_known_timestamp: store.clock(),
        policy: ConflictResolutionPolicy::ClientWins,
    };

    let options = SyncOptions::default();
    let resolver = ConflictResolver::new();
    let applied = ChangeApplier::new(&store, &setup, &options, &resolver)
        .apply(&collision(), ctx, &CancellationToken::new())
        .unwrap();
    assert_eq!(applied.total_applied(), 0);
    assert_eq!(applied.table("customer").unwrap().failed, 1);
    assert!(store.get("customer", &PrimaryKey::single(2)).is_none());
    assert_eq!(live_rows(&store, "customer"), vec![customer(1, "a@example.com", "Local")]);

    let throwing = SyncOptions::default().with_error_policy(ErrorPolicy::Throw);
    let err = ChangeApplier::new(&store, &setup, &throwing, &resolver)
        .apply(&collision(), ctx, &CancellationToken::new())
        .unwrap_err();
    assert!(matches!(err, SyncError::RowApplyFailed { ref key, .. } if key == "(2)"));
    assert_eq!(store.active_transactions(), 0);
}

#[test]
fn deletes_run_children_first_and_upserts_parents_first() {
    let setup = customer_order_setup();
    let store = MemoryStore::with_setup(&setup);
    store.insert_local("customer", customer(1, "old@example.com", "Old")).unwrap();
    store.insert_local("order", order(10, 1, 5.0)).unwrap();

    let mut acc = BatchAccumulator::unbounded(Uuid::new_v4(), CodecKind::Cbor);
    // Rows are added in the order least favourable to the constraints.
    acc.add("order", SyncRow::new(RowState::Inserted, order(20, 2, 7.5))).unwrap();
    let key = |id: i64| Row::new().with("id", id);
    acc.add("customer", SyncRow::new(RowState::Deleted, key(1))).unwrap();
    acc.add("order", SyncRow::new(RowState::Deleted, key(10))).unwrap();
    acc.add("customer", SyncRow::new(RowState::Inserted, customer(2, "new@example.com", "New")))
        .unwrap();
    let batch = acc.finalize().unwrap();

    let options = SyncOptions::default().with_error_policy(ErrorPolicy::Throw);
    let resolver = ConflictResolver::new();
    let applied = ChangeApplier::new(&store, &setup, &options, &resolver)
        .apply(
            &batch,
            ApplyContext {
                sender_scope_id: SCOPE_B,
                last_known_timestamp: store.clock(),
                policy: ConflictResolutionPolicy::ServerWins,
            },
            &CancellationToken::new(),
        )
        .unwrap();

    assert!(store.constraints_enabled());
    assert_eq!(applied.total_failed(), 0);
    assert_eq!(applied.total_applied(), 4);
    assert_eq!(live_rows(&store, "customer"), vec![customer(2, "new@example.com", "New")]);
    assert_eq!(live_rows(&store, "order"), vec![order(20, 2, 7.5)]);
}

#[test]
fn orphan_child_fails_without_aborting_the_batch() {
    let setup = customer_order_setup();
    let store = MemoryStore::with_setup(&setup);
    let batch = {
        let mut acc = BatchAccumulator::unbounded(Uuid::new_v4(), CodecKind::Json);
        acc.add("customer", SyncRow::new(RowState::Inserted, customer(1, "a@example.com", "A")))
            .unwrap();
        acc.add("order", SyncRow::new(RowState::Inserted, order(10, 1, 1.0))).unwrap();
        acc.add("order", SyncRow::new(RowState::Inserted, order(11, 99, 1.0))).unwrap();
        acc.finalize().unwrap()
    };

    let options = SyncOptions::default();
    let resolver = ConflictResolver::new();
    let applied = ChangeApplier::new(&store, &setup, &options, &resolver)
        .apply(
            &batch,
            ApplyContext {
                sender_scope_id: SCOPE_B,
                last_known_timestamp: 0,
                policy: ConflictResolutionPolicy::ClientWins,
            },
            &CancellationToken::new(),
        )
        .unwrap();

    assert_eq!(applied.total_applied(), 2);
    assert_eq!(applied.table("order").unwrap().failed, 1);
    assert!(store.get("order", &PrimaryKey::single(11)).is_none());
}

#[test]
fn constraints_are_restored_when_a_write_fails() {
    let setup = item_setup();
    let store = MemoryStore::with_setup(&setup);
    store.arm(FailPoint::WriteTable("item".to_string()));

    let options = SyncOptions::default().with_disable_constraints_on_apply(true);
    let resolver = ConflictResolver::new();
    let err = ChangeApplier::new(&store, &setup, &options, &resolver)
        .apply(
            &batch("item", vec![SyncRow::new(RowState::Inserted, item(1, "a", 1))]),
            from_b(ConflictResolutionPolicy::ServerWins),
            &CancellationToken::new(),
        )
        .unwrap_err();

    assert!(err.is_retryable());
    assert!(store.constraints_enabled());
    assert_eq!(store.active_transactions(), 0);
    assert!(store.rows("item").is_empty());
}
