//! The data store capability.

use crate::error::StoreResult;
use crate::outcome::{Rejection, WriteOutcome, WriteRequest};
use crate::transaction::{IsolationLevel, Transaction};
use scopesync_protocol::{
    PrimaryKey, RowFilter, ScopeInfo, ScopeInfoClient, TableSchema, TrackedRow,
};
use uuid::Uuid;

/// Stream of tracked rows from one read.
pub type RowStream<'a> = Box<dyn Iterator<Item = StoreResult<TrackedRow>> + 'a>;

/// Everything the sync engine needs from a database.
///
/// Implementations own row data and tracking metadata. The engine reads and
/// writes rows only through this trait and never branches on the concrete
/// backend.
///
/// # Invariants
///
/// - timestamps are assigned by the store, strictly increase, and are never
///   reused
/// - a tombstoned row is returned with key columns only
/// - `write_row` with `force == false` applies the optimistic predicate;
///   `force == true` bypasses it
/// - a successful write records `sender_scope_id` as the row's updater and
///   advances its update timestamp in the same operation
///
/// # Implementors
///
/// - [`super::MemoryStore`] - in-memory reference backend
pub trait DataStore: Send + Sync {
    /// Begins a transaction.
    fn begin_transaction(&self, isolation: IsolationLevel) -> StoreResult<Transaction>;

    /// Commits a transaction.
    fn commit(&self, txn: Transaction) -> StoreResult<()>;

    /// Rolls back a transaction, undoing its writes.
    fn rollback(&self, txn: Transaction) -> StoreResult<()>;

    /// Takes a sync watermark.
    ///
    /// The returned timestamp is carried by no row: every row written before
    /// the call has a smaller one, every write after it a strictly greater one.
    fn current_timestamp(&self, txn: &Transaction) -> StoreResult<i64>;

    /// Timestamp up to which tombstones have been purged, 0 if never.
    fn cleanup_horizon(&self) -> StoreResult<i64>;

    /// Reads rows of `table` whose update timestamp is greater than `since`,
    /// or every row when `since` is `None`. Rows must pass all `filters`.
    ///
    /// Tombstones are included. Order is unspecified but stable within one read.
    fn read_tracked_rows<'a>(
        &'a self,
        txn: &Transaction,
        table: &TableSchema,
        since: Option<i64>,
        filters: &[&RowFilter],
    ) -> StoreResult<RowStream<'a>>;

    /// Reads one row by key, tombstones included.
    fn read_row(
        &self,
        txn: &Transaction,
        table: &TableSchema,
        key: &PrimaryKey,
    ) -> StoreResult<Option<TrackedRow>>;

    /// Writes one row.
    ///
    /// The optimistic predicate passes when the destination row is absent,
    /// when its update timestamp is at most `expected_timestamp`, or when it
    /// was last updated by `sender_scope_id` itself. Deleting an absent or
    /// already deleted row is rejected with [`Rejection::Concurrency`].
    fn write_row(
        &self,
        txn: &Transaction,
        table: &TableSchema,
        request: &WriteRequest,
    ) -> StoreResult<WriteOutcome>;

    /// Writes a slice of rows, returning the rejected ones by request index.
    ///
    /// A rejection does not stop the remaining rows.
    fn write_rows(
        &self,
        txn: &Transaction,
        table: &TableSchema,
        requests: &[WriteRequest],
    ) -> StoreResult<Vec<(usize, Rejection)>> {
        let mut rejected = Vec::new();
        for (index, request) in requests.iter().enumerate() {
            if let Err(rejection) = self.write_row(txn, table, request)? {
                rejected.push((index, rejection));
            }
        }
        Ok(rejected)
    }

    /// Reads this participant's record of a scope.
    fn read_scope(&self, name: &str) -> StoreResult<Option<ScopeInfo>>;

    /// Persists this participant's record of a scope.
    fn write_scope(&self, scope: &ScopeInfo) -> StoreResult<()>;

    /// Reads the reference scope of a client.
    fn read_client_scope(
        &self,
        scope_name: &str,
        client_id: Uuid,
    ) -> StoreResult<Option<ScopeInfoClient>>;

    /// Persists the reference scope of a client.
    fn write_client_scope(&self, scope: &ScopeInfoClient) -> StoreResult<()>;

    /// Claims the session slot `key` for the whole store.
    ///
    /// Returns false if another session holds it. Claims are not reentrant.
    fn try_claim_session(&self, key: &str) -> StoreResult<bool>;

    /// Releases a slot taken by [`DataStore::try_claim_session`].
    fn release_session(&self, key: &str) -> StoreResult<()>;

    /// Suspends foreign-key checking within `txn`.
    fn disable_constraints(&self, txn: &Transaction) -> StoreResult<()>;

    /// Resumes foreign-key checking within `txn`.
    fn enable_constraints(&self, txn: &Transaction) -> StoreResult<()>;
}
