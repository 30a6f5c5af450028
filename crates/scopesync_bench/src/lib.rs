//! Benchmark utilities.

#![deny(unsafe_code)]

use scopesync_protocol::{
    ColumnSchema, ColumnType, Row, RowState, SetupResult, SyncRow, SyncSetup, TableSchema,
    TrackingMetadata,
};
use uuid::Uuid;

/// Single-table setup used by every benchmark.
pub fn bench_setup() -> SetupResult<SyncSetup> {
    SyncSetup::new(vec![TableSchema::new("item")
        .column(ColumnSchema::new("id", ColumnType::Integer).not_null())
        .column(ColumnSchema::new("name", ColumnType::Text))
        .column(ColumnSchema::new("payload", ColumnType::Blob))
        .primary_key(&["id"])])
}

/// A row carrying `payload_size` bytes of payload.
pub fn bench_row(id: i64, payload_size: usize) -> Row {
    Row::new()
        .with("id", id)
        .with("name", format!("item-{id}"))
        .with("payload", vec![(id % 251) as u8; payload_size])
}

/// Generate `count` inserted rows with the given payload size.
pub fn generate_rows(count: usize, payload_size: usize) -> Vec<SyncRow> {
    (0..count as i64)
        .map(|id| SyncRow::new(RowState::Inserted, bench_row(id, payload_size)))
        .collect()
}

/// Generate tracking metadata spread over `count` timestamps and three scopes.
pub fn generate_metadata(count: usize) -> Vec<TrackingMetadata> {
    let scopes = [None, Some(Uuid::from_u128(1)), Some(Uuid::from_u128(2))];
    (0..count as i64)
        .map(|i| TrackingMetadata {
            create_scope_id: scopes[(i % 3) as usize],
            update_scope_id: scopes[((i / 3) % 3) as usize],
            create_timestamp: i,
            update_timestamp: i + i % 7,
            is_tombstone: i % 11 == 0,
        })
        .collect()
}
