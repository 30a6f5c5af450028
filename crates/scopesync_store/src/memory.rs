//! In-memory reference data store.

use crate::error::{StoreError, StoreResult};
use crate::outcome::{Applied, Rejection, WriteOp, WriteOutcome, WriteRequest};
use crate::store::{DataStore, RowStream};
use crate::transaction::{IsolationLevel, Transaction};
use parking_lot::Mutex;
use scopesync_protocol::{
    PrimaryKey, Row, RowFilter, ScopeInfo, ScopeInfoClient, SyncSetup, TableSchema, TrackedRow,
    TrackingMetadata,
};
use scopesync_codec::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use uuid::Uuid;

/// A fault that fires once when armed with [`MemoryStore::arm`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FailPoint {
    /// Next `begin_transaction`.
    BeginTransaction,
    /// Next `commit`; the transaction is rolled back.
    Commit,
    /// Next `enable_constraints`.
    EnableConstraints,
    /// Next write to the named table.
    WriteTable(String),
}

impl fmt::Display for FailPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailPoint::BeginTransaction => f.write_str("begin_transaction"),
            FailPoint::Commit => f.write_str("commit"),
            FailPoint::EnableConstraints => f.write_str("enable_constraints"),
            FailPoint::WriteTable(table) => write!(f, "write `{table}`"),
        }
    }
}

#[derive(Debug, Clone)]
struct StoredRow {
    // Tombstones keep their values so filters still apply to them.
    values: Row,
    metadata: TrackingMetadata,
}

impl StoredRow {
    fn is_live(&self) -> bool {
        !self.metadata.is_tombstone
    }

    fn exposed(&self, schema: &TableSchema) -> TrackedRow {
        let row = if self.metadata.is_tombstone {
            self.values.key_projection(schema)
        } else {
            self.values.clone()
        };
        TrackedRow {
            row,
            metadata: self.metadata,
        }
    }
}

#[derive(Debug)]
struct Table {
    schema: TableSchema,
    rows: BTreeMap<PrimaryKey, StoredRow>,
}

#[derive(Debug)]
enum Undo {
    Row {
        table: String,
        key: PrimaryKey,
        previous: Option<StoredRow>,
    },
    Constraints(bool),
}

#[derive(Debug)]
struct ActiveTransaction {
    isolation: IsolationLevel,
    undo: Vec<Undo>,
}

#[derive(Debug)]
struct Inner {
    clock: i64,
    horizon: i64,
    next_txn: u64,
    commits: u64,
    tables: BTreeMap<String, Table>,
    scopes: BTreeMap<String, ScopeInfo>,
    client_scopes: BTreeMap<(String, Uuid), ScopeInfoClient>,
    sessions: BTreeSet<String>,
    transactions: HashMap<u64, ActiveTransaction>,
    constraints_enabled: bool,
    fail_points: Vec<FailPoint>,
}

/// A complete in-memory [`DataStore`].
///
/// - a logical clock starting at 1 assigns row timestamps and watermarks
/// - deletes leave tombstones until [`MemoryStore::purge_tombstones`]
/// - unique constraints are always enforced
/// - foreign keys are enforced while constraints are enabled
/// - transactions keep undo logs; writes are visible to every reader at once
///
/// # Example
///
/// ```rust
/// use scopesync_protocol::{ColumnSchema, ColumnType, PrimaryKey, Row, TableSchema};
/// use scopesync_store::MemoryStore;
///
/// let store = MemoryStore::new();
/// store.create_table(
///     TableSchema::new("item")
///         .column(ColumnSchema::new("id", ColumnType::Integer).not_null())
///         .primary_key(&["id"]),
/// );
/// let meta = store.insert_local("item", Row::new().with("id", 1)).unwrap();
/// assert_eq!(meta.update_timestamp, 1);
/// assert!(store.get("item", &PrimaryKey::single(1)).is_some());
/// ```
#[derive(Debug)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Creates an empty store with no tables.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                clock: 0,
                horizon: 0,
                next_txn: 1,
                commits: 0,
                tables: BTreeMap::new(),
                scopes: BTreeMap::new(),
                client_scopes: BTreeMap::new(),
                sessions: BTreeSet::new(),
                transactions: HashMap::new(),
                constraints_enabled: true,
                fail_points: Vec::new(),
            }),
        }
    }

    /// Creates a store provisioned with every table of `setup`.
    #[must_use]
    pub fn with_setup(setup: &SyncSetup) -> Self {
        let store = Self::new();
        for table in setup.tables() {
            store.create_table(table.clone());
        }
        store
    }

    /// Provisions a table. An existing table of that name is replaced.
    pub fn create_table(&self, schema: TableSchema) {
        self.inner.lock().tables.insert(
            schema.name().to_string(),
            Table {
                schema,
                rows: BTreeMap::new(),
            },
        );
    }

    /// Inserts a row authored locally.
    pub fn insert_local(&self, table: &str, row: Row) -> StoreResult<TrackingMetadata> {
        let mut inner = self.inner.lock();
        let key = inner.key_of(table, &row)?;
        if inner.stored(table, &key)?.is_some_and(StoredRow::is_live) {
            return Err(StoreError::Rejected {
                table: table.to_string(),
                key,
                rejection: Rejection::UniqueConstraint {
                    name: "primary_key".to_string(),
                },
            });
        }
        inner.local_write(table, key, WriteOp::Insert, row)
    }

    /// Replaces a live row, authored locally.
    pub fn update_local(&self, table: &str, row: Row) -> StoreResult<TrackingMetadata> {
        let mut inner = self.inner.lock();
        let key = inner.key_of(table, &row)?;
        if !inner.stored(table, &key)?.is_some_and(StoredRow::is_live) {
            return Err(StoreError::Rejected {
                table: table.to_string(),
                key,
                rejection: Rejection::Concurrency,
            });
        }
        inner.local_write(table, key, WriteOp::Update, row)
    }

    /// Deletes a live row, authored locally.
    pub fn delete_local(&self, table: &str, key: &PrimaryKey) -> StoreResult<TrackingMetadata> {
        let mut inner = self.inner.lock();
        let row = match inner.stored(table, key)? {
            Some(stored) if stored.is_live() => stored.values.clone(),
            _ => {
                return Err(StoreError::Rejected {
                    table: table.to_string(),
                    key: key.clone(),
                    rejection: Rejection::Concurrency,
                })
            }
        };
        inner.local_write(table, key.clone(), WriteOp::Delete, row)
    }

    /// Stores a row with exact tracking metadata, advancing the clock past it.
    pub fn seed_row(&self, table: &str, row: Row, metadata: TrackingMetadata) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        let key = inner.key_of(table, &row)?;
        inner.clock = inner
            .clock
            .max(metadata.update_timestamp)
            .max(metadata.create_timestamp);
        inner
            .table_mut(table)?
            .rows
            .insert(key, StoredRow { values: row, metadata });
        Ok(())
    }

    /// Reads a row outside any transaction.
    pub fn get(&self, table: &str, key: &PrimaryKey) -> Option<TrackedRow> {
        let inner = self.inner.lock();
        let table = inner.tables.get(table)?;
        table.rows.get(key).map(|r| r.exposed(&table.schema))
    }

    /// Every row of a table in key order, tombstones included.
    pub fn rows(&self, table: &str) -> Vec<TrackedRow> {
        let inner = self.inner.lock();
        inner
            .tables
            .get(table)
            .map(|t| t.rows.values().map(|r| r.exposed(&t.schema)).collect())
            .unwrap_or_default()
    }

    /// Number of live rows in a table.
    pub fn live_row_count(&self, table: &str) -> usize {
        let inner = self.inner.lock();
        inner
            .tables
            .get(table)
            .map_or(0, |t| t.rows.values().filter(|r| r.is_live()).count())
    }

    /// Removes tombstones last updated at or before `before` and advances the
    /// cleanup horizon. Returns the number removed.
    pub fn purge_tombstones(&self, before: i64) -> usize {
        let mut inner = self.inner.lock();
        let mut removed = 0;
        for table in inner.tables.values_mut() {
            let count = table.rows.len();
            table
                .rows
                .retain(|_, r| r.is_live() || r.metadata.update_timestamp > before);
            removed += count - table.rows.len();
        }
        inner.horizon = inner.horizon.max(before);
        tracing::debug!(before, removed, "purged tombstones");
        removed
    }

    /// Arms a one-shot fault.
    pub fn arm(&self, point: FailPoint) {
        self.inner.lock().fail_points.push(point);
    }

    /// Returns true if foreign keys are currently enforced.
    pub fn constraints_enabled(&self) -> bool {
        self.inner.lock().constraints_enabled
    }

    /// Number of open transactions.
    pub fn active_transactions(&self) -> usize {
        self.inner.lock().transactions.len()
    }

    /// Session slots currently claimed.
    pub fn claimed_sessions(&self) -> Vec<String> {
        self.inner.lock().sessions.iter().cloned().collect()
    }

    /// Number of committed transactions so far.
    pub fn committed_transactions(&self) -> u64 {
        self.inner.lock().commits
    }

    /// Current value of the logical clock.
    pub fn clock(&self) -> i64 {
        self.inner.lock().clock
    }
}

impl Inner {
    fn table(&self, name: &str) -> StoreResult<&Table> {
        self.tables
            .get(name)
            .ok_or_else(|| StoreError::UnknownTable(name.to_string()))
    }

    fn table_mut(&mut self, name: &str) -> StoreResult<&mut Table> {
        self.tables
            .get_mut(name)
            .ok_or_else(|| StoreError::UnknownTable(name.to_string()))
    }

    fn key_of(&self, table: &str, row: &Row) -> StoreResult<PrimaryKey> {
        row.primary_key(&self.table(table)?.schema)
            .ok_or_else(|| StoreError::invalid_row(table, "missing primary key"))
    }

    fn stored(&self, table: &str, key: &PrimaryKey) -> StoreResult<Option<&StoredRow>> {
        Ok(self.table(table)?.rows.get(key))
    }

    fn check_txn(&self, txn: &Transaction) -> StoreResult<()> {
        if self.transactions.contains_key(&txn.id()) {
            Ok(())
        } else {
            Err(StoreError::TransactionNotActive(txn.id()))
        }
    }

    fn fire(&mut self, point: &FailPoint) -> StoreResult<()> {
        match self.fail_points.iter().position(|p| p == point) {
            Some(pos) => {
                self.fail_points.remove(pos);
                Err(StoreError::Injected(point.to_string()))
            }
            None => Ok(()),
        }
    }

    fn local_write(
        &mut self,
        table: &str,
        key: PrimaryKey,
        op: WriteOp,
        row: Row,
    ) -> StoreResult<TrackingMetadata> {
        let request = WriteRequest::forced(op, row, None);
        match self.write(None, table, &request)? {
            Ok(applied) => Ok(applied.metadata),
            Err(rejection) => Err(StoreError::Rejected {
                table: table.to_string(),
                key,
                rejection,
            }),
        }
    }

    fn write(
        &mut self,
        txn: Option<u64>,
        table_name: &str,
        request: &WriteRequest,
    ) -> StoreResult<WriteOutcome> {
        self.fire(&FailPoint::WriteTable(table_name.to_string()))?;

        let key = self.key_of(table_name, &request.row)?;
        let existing = self.stored(table_name, &key)?.cloned();
        let is_delete = request.op == WriteOp::Delete;

        if is_delete {
            match &existing {
                Some(stored) if stored.is_live() || request.force => {}
                _ => return Ok(Err(Rejection::Concurrency)),
            }
        }
        if !request.force && !predicate_passes(existing.as_ref(), request) {
            return Ok(Err(Rejection::Concurrency));
        }

        if is_delete {
            if self.constraints_enabled {
                if let Some(stored) = existing.as_ref().filter(|s| s.is_live()) {
                    let child = self.referencing_child(table_name, &key, &stored.values);
                    if let Some(rejection) = child {
                        return Ok(Err(rejection));
                    }
                }
            }
        } else {
            let table = self.table(table_name)?;
            if let Some(rejection) = unique_violation(table, &key, &request.row) {
                return Ok(Err(rejection));
            }
            if self.constraints_enabled {
                if let Some(rejection) = self.missing_parent(&table.schema, &request.row) {
                    return Ok(Err(rejection));
                }
            }
        }

        self.clock += 1;
        let ts = self.clock;
        let sender = request.sender_scope_id;
        let (values, metadata) = match existing.as_ref() {
            Some(prev) if is_delete => (
                prev.values.clone(),
                TrackingMetadata {
                    update_scope_id: sender,
                    update_timestamp: ts,
                    is_tombstone: true,
                    ..prev.metadata
                },
            ),
            Some(prev) if prev.is_live() => (
                request.row.clone(),
                TrackingMetadata {
                    update_scope_id: sender,
                    update_timestamp: ts,
                    ..prev.metadata
                },
            ),
            _ => (request.row.clone(), TrackingMetadata::created(sender, ts)),
        };

        self.table_mut(table_name)?
            .rows
            .insert(key.clone(), StoredRow { values, metadata });
        if let Some(id) = txn {
            if let Some(active) = self.transactions.get_mut(&id) {
                active.undo.push(Undo::Row {
                    table: table_name.to_string(),
                    key,
                    previous: existing,
                });
            }
        }
        Ok(Ok(Applied { metadata }))
    }

    fn missing_parent(&self, schema: &TableSchema, row: &Row) -> Option<Rejection> {
        for fk in schema.foreign_keys() {
            let Some(child_values) = non_null_values(row, &fk.columns) else {
                continue;
            };
            if fk.parent_table == schema.name()
                && non_null_values(row, &fk.parent_columns).as_ref() == Some(&child_values)
            {
                continue;
            }
            let found = self.tables.get(&fk.parent_table).is_some_and(|parent| {
                parent.rows.values().any(|p| {
                    p.is_live()
                        && non_null_values(&p.values, &fk.parent_columns).as_ref()
                            == Some(&child_values)
                })
            });
            if !found {
                return Some(Rejection::Constraint {
                    message: format!("{}: no parent row in `{}`", fk.name, fk.parent_table),
                });
            }
        }
        None
    }

    fn referencing_child(
        &self,
        parent_table: &str,
        key: &PrimaryKey,
        parent: &Row,
    ) -> Option<Rejection> {
        for table in self.tables.values() {
            for fk in table.schema.foreign_keys() {
                if fk.parent_table != parent_table {
                    continue;
                }
                let Some(parent_values) = non_null_values(parent, &fk.parent_columns) else {
                    continue;
                };
                let referenced = table.rows.iter().any(|(child_key, child)| {
                    child.is_live()
                        && !(table.schema.name() == parent_table && child_key == key)
                        && non_null_values(&child.values, &fk.columns).as_ref()
                            == Some(&parent_values)
                });
                if referenced {
                    return Some(Rejection::Constraint {
                        message: format!(
                            "{}: rows in `{}` still reference it",
                            fk.name,
                            table.schema.name()
                        ),
                    });
                }
            }
        }
        None
    }

    fn undo(&mut self, entries: Vec<Undo>) {
        for entry in entries.into_iter().rev() {
            match entry {
                Undo::Row {
                    table,
                    key,
                    previous,
                } => {
                    if let Some(t) = self.tables.get_mut(&table) {
                        match previous {
                            Some(row) => {
                                t.rows.insert(key, row);
                            }
                            None => {
                                t.rows.remove(&key);
                            }
                        }
                    }
                }
                Undo::Constraints(previous) => self.constraints_enabled = previous,
            }
        }
    }
}

fn predicate_passes(existing: Option<&StoredRow>, request: &WriteRequest) -> bool {
    match existing {
        None => true,
        Some(stored) => {
            stored.metadata.update_timestamp <= request.expected_timestamp
                || (request.sender_scope_id.is_some()
                    && stored.metadata.update_scope_id == request.sender_scope_id)
        }
    }
}

fn non_null_values(row: &Row, columns: &[String]) -> Option<Vec<Value>> {
    columns
        .iter()
        .map(|c| row.get(c).filter(|v| !v.is_null()).cloned())
        .collect()
}

fn unique_violation(table: &Table, key: &PrimaryKey, row: &Row) -> Option<Rejection> {
    for constraint in table.schema.unique_constraints() {
        let Some(values) = non_null_values(row, &constraint.columns) else {
            continue;
        };
        let clash = table.rows.iter().any(|(other_key, other)| {
            other_key != key
                && other.is_live()
                && non_null_values(&other.values, &constraint.columns).as_ref() == Some(&values)
        });
        if clash {
            return Some(Rejection::UniqueConstraint {
                name: constraint.name.clone(),
            });
        }
    }
    None
}

impl DataStore for MemoryStore {
    fn begin_transaction(&self, isolation: IsolationLevel) -> StoreResult<Transaction> {
        let mut inner = self.inner.lock();
        inner.fire(&FailPoint::BeginTransaction)?;
        let id = inner.next_txn;
        inner.next_txn += 1;
        inner.transactions.insert(
            id,
            ActiveTransaction {
                isolation,
                undo: Vec::new(),
            },
        );
        tracing::trace!(txn = id, ?isolation, "begin");
        Ok(Transaction::new(id, isolation))
    }

    fn commit(&self, txn: Transaction) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        let active = inner
            .transactions
            .remove(&txn.id())
            .ok_or(StoreError::TransactionNotActive(txn.id()))?;
        if let Err(e) = inner.fire(&FailPoint::Commit) {
            inner.undo(active.undo);
            return Err(e);
        }
        inner.commits += 1;
        tracing::trace!(
            txn = txn.id(),
            isolation = ?active.isolation,
            writes = active.undo.len(),
            "commit"
        );
        Ok(())
    }

    fn rollback(&self, txn: Transaction) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        let active = inner
            .transactions
            .remove(&txn.id())
            .ok_or(StoreError::TransactionNotActive(txn.id()))?;
        tracing::trace!(txn = txn.id(), writes = active.undo.len(), "rollback");
        inner.undo(active.undo);
        Ok(())
    }

    fn current_timestamp(&self, txn: &Transaction) -> StoreResult<i64> {
        let mut inner = self.inner.lock();
        inner.check_txn(txn)?;
        // Watermarks take a tick of their own.
        inner.clock += 1;
        Ok(inner.clock)
    }

    fn cleanup_horizon(&self) -> StoreResult<i64> {
        Ok(self.inner.lock().horizon)
    }

    fn read_tracked_rows<'a>(
        &'a self,
        txn: &Transaction,
        table: &TableSchema,
        since: Option<i64>,
        filters: &[&RowFilter],
    ) -> StoreResult<RowStream<'a>> {
        let inner = self.inner.lock();
        inner.check_txn(txn)?;
        let stored = inner.table(table.name())?;
        let rows: Vec<StoreResult<TrackedRow>> = stored
            .rows
            .values()
            .filter(|r| since.map_or(true, |ts| r.metadata.update_timestamp > ts))
            .filter(|r| filters.iter().all(|f| f.matches(table.name(), &r.values)))
            .map(|r| Ok(r.exposed(&stored.schema)))
            .collect();
        Ok(Box::new(rows.into_iter()))
    }

    fn read_row(
        &self,
        txn: &Transaction,
        table: &TableSchema,
        key: &PrimaryKey,
    ) -> StoreResult<Option<TrackedRow>> {
        let inner = self.inner.lock();
        inner.check_txn(txn)?;
        let stored = inner.table(table.name())?;
        Ok(stored.rows.get(key).map(|r| r.exposed(&stored.schema)))
    }

    fn write_row(
        &self,
        txn: &Transaction,
        table: &TableSchema,
        request: &WriteRequest,
    ) -> StoreResult<WriteOutcome> {
        let mut inner = self.inner.lock();
        inner.check_txn(txn)?;
        inner.write(Some(txn.id()), table.name(), request)
    }

    fn read_scope(&self, name: &str) -> StoreResult<Option<ScopeInfo>> {
        Ok(self.inner.lock().scopes.get(name).cloned())
    }

    fn write_scope(&self, scope: &ScopeInfo) -> StoreResult<()> {
        self.inner
            .lock()
            .scopes
            .insert(scope.name.clone(), scope.clone());
        Ok(())
    }

    fn read_client_scope(
        &self,
        scope_name: &str,
        client_id: Uuid,
    ) -> StoreResult<Option<ScopeInfoClient>> {
        Ok(self
            .inner
            .lock()
            .client_scopes
            .get(&(scope_name.to_string(), client_id))
            .cloned())
    }

    fn write_client_scope(&self, scope: &ScopeInfoClient) -> StoreResult<()> {
        self.inner.lock().client_scopes.insert(
            (scope.scope_name.clone(), scope.client_id),
            scope.clone(),
        );
        Ok(())
    }

    fn try_claim_session(&self, key: &str) -> StoreResult<bool> {
        Ok(self.inner.lock().sessions.insert(key.to_string()))
    }

    fn release_session(&self, key: &str) -> StoreResult<()> {
        self.inner.lock().sessions.remove(key);
        Ok(())
    }

    fn disable_constraints(&self, txn: &Transaction) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        inner.check_txn(txn)?;
        let previous = inner.constraints_enabled;
        inner.constraints_enabled = false;
        if let Some(active) = inner.transactions.get_mut(&txn.id()) {
            active.undo.push(Undo::Constraints(previous));
        }
        Ok(())
    }

    fn enable_constraints(&self, txn: &Transaction) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        inner.fire(&FailPoint::EnableConstraints)?;
        inner.check_txn(txn)?;
        let previous = inner.constraints_enabled;
        inner.constraints_enabled = true;
        if let Some(active) = inner.transactions.get_mut(&txn.id()) {
            active.undo.push(Undo::Constraints(previous));
        }
        Ok(())
    }
}
