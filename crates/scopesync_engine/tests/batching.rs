//! Integration tests for batching and spooled sessions.

use proptest::prelude::*;
use scopesync_codec::CodecKind;
use scopesync_engine::{
    BatchAccumulator, BatchInfo, CancellationToken, ChangeEnumerator, LocalOrchestrator,
    RemoteOrchestrator, SyncError, SyncOptions,
};
use scopesync_protocol::{
    ColumnSchema, ColumnType, Row, RowState, ScopeInfo, SyncDirection, SyncParameters, SyncRow,
    SyncSetup, TableSchema,
};
use scopesync_store::MemoryStore;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use uuid::Uuid;

fn setup() -> SyncSetup {
    SyncSetup::new(vec![TableSchema::new("note")
        .column(ColumnSchema::new("id", ColumnType::Integer).not_null())
        .column(ColumnSchema::new("body", ColumnType::Text))
        .primary_key(&["id"])])
    .unwrap()
}

fn note(id: i64, body: &str) -> Row {
    Row::new().with("id", id).with("body", body)
}

fn entries(dir: &Path) -> usize {
    std::fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn every_row_lands_in_exactly_one_part(
        lengths in prop::collection::vec(0usize..120, 0..80),
        slack in 0usize..400,
        json in any::<bool>(),
    ) {
        let rows: Vec<SyncRow> = lengths
            .iter()
            .enumerate()
            .map(|(i, len)| SyncRow::new(RowState::Inserted, note(i as i64, &"x".repeat(*len))))
            .collect();
        let budget = rows.iter().map(SyncRow::approximate_size).max().unwrap_or(1) + slack;
        let codec = if json { CodecKind::Json } else { CodecKind::Cbor };

        let root = TempDir::new().unwrap();
        let mut acc = BatchAccumulator::spooled(Uuid::new_v4(), codec, budget, root.path());
        acc.add_rows("note", rows.clone()).unwrap();
        let batch = acc.finalize().unwrap();
        batch.validate().unwrap();

        let reloaded = match batch.directory() {
            Some(dir) => BatchInfo::load(dir).unwrap(),
            None => batch,
        };
        let manifest = reloaded.manifest();
        let indices: Vec<u32> = manifest.parts.iter().map(|p| p.index).collect();
        prop_assert_eq!(indices, (0..manifest.parts.len() as u32).collect::<Vec<_>>());
        prop_assert_eq!(manifest.parts.iter().filter(|p| p.is_last).count(), 1);
        prop_assert!(manifest.parts.last().unwrap().is_last);

        let mut seen = Vec::new();
        for part in reloaded.parts() {
            let part = part.unwrap();
            if manifest.parts.len() > 1 {
                prop_assert!(part.size <= budget);
            }
            seen.extend(part.tables.into_iter().flat_map(|t| t.rows));
        }
        prop_assert_eq!(seen, rows);
    }
}

#[test]
fn oversized_row_aborts_selection_without_leftovers() {
    let setup = setup();
    let store = MemoryStore::with_setup(&setup);
    store.insert_local("note", note(1, "short")).unwrap();
    store.insert_local("note", note(2, &"y".repeat(4096))).unwrap();

    let root = TempDir::new().unwrap();
    let options = SyncOptions::default()
        .with_batch_size(40)
        .with_batch_directory(root.path());
    let scope = ScopeInfo::requesting(Uuid::new_v4(), "default", 0, true);
    let err = ChangeEnumerator::new(&store, &setup, &options)
        .enumerate(
            &scope,
            SyncDirection::Upload,
            &SyncParameters::new(),
            Uuid::new_v4(),
            &CancellationToken::new(),
        )
        .unwrap_err();

    assert!(matches!(
        err,
        SyncError::RowOverSized { ref table, budget: 40, .. } if table == "note"
    ));
    assert_eq!(entries(root.path()), 0);
}

fn spooled_session(cleanup: bool) -> (TempDir, Arc<MemoryStore>, Arc<MemoryStore>) {
    let setup = setup();
    let root = TempDir::new().unwrap();
    let options = SyncOptions::default()
        .with_batch_size(128)
        .with_batch_directory(root.path())
        .with_cleanup_batch_directories(cleanup);

    let server_store = Arc::new(MemoryStore::with_setup(&setup));
    let client_store = Arc::new(MemoryStore::with_setup(&setup));
    for id in 0..30 {
        client_store.insert_local("note", note(id, "client note")).unwrap();
        server_store.insert_local("note", note(100 + id, "server note")).unwrap();
    }

    let server = RemoteOrchestrator::new(server_store.clone(), setup.clone(), options.clone());
    let client = LocalOrchestrator::new(client_store.clone(), setup, options);
    let summary = client
        .synchronize("default", &SyncParameters::new(), &server, &CancellationToken::new(), &|_| {})
        .unwrap();
    assert_eq!(summary.upload_applied.total_applied(), 30);
    assert_eq!(summary.total_failed(), 0);
    (root, server_store, client_store)
}

#[test]
fn spooled_session_removes_its_directories() {
    let (root, server, client) = spooled_session(true);
    assert_eq!(entries(root.path()), 0);
    assert_eq!(server.live_row_count("note"), 60);
    assert_eq!(client.live_row_count("note"), 60);
}

#[test]
fn kept_directories_hold_valid_batches() {
    let (root, _, _) = spooled_session(false);
    let dirs: Vec<_> = std::fs::read_dir(root.path())
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    assert_eq!(dirs.len(), 2);

    let mut counts = BTreeSet::new();
    for dir in dirs {
        let batch = BatchInfo::load(&dir).unwrap();
        batch.validate().unwrap();
        assert!(batch.manifest().parts.len() > 1);
        counts.insert(batch.row_count());
    }
    // Upload of 30 rows, download of all 60 to a new reference scope.
    assert_eq!(counts, BTreeSet::from([30, 60]));
}
