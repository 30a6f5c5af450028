//! Change application.
//!
//! Deletes are applied first, children before parents; inserts and updates
//! follow, parents before children. Each row write is an optimistic write on
//! behalf of the sender. A refused write becomes a [`SyncConflict`] which the
//! [`ConflictResolver`] settles inside the same transaction.

use crate::batch::BatchInfo;
use crate::cancel::CancellationToken;
use crate::config::{ErrorPolicy, SyncOptions, TransactionMode};
use crate::error::{SyncError, SyncResult};
use crate::resolver::{ConflictResolver, RowOutcome};
use scopesync_protocol::{
    ConflictResolutionPolicy, ConflictType, DatabaseChangesApplied, LocalRowState, RowState,
    SyncConflict, SyncRow, SyncSetup, TableChangesApplied, TableSchema,
};
use scopesync_store::{
    ConstraintsGuard, DataStore, Rejection, Transaction, TransactionScope, WriteOp, WriteRequest,
};
use uuid::Uuid;

/// Which rows a pass over the tables applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyPhase {
    /// Deleted rows, in reverse dependency order.
    Deletes,
    /// Inserted and updated rows, in dependency order.
    Upserts,
}

impl ApplyPhase {
    fn includes(self, state: RowState) -> bool {
        match self {
            ApplyPhase::Deletes => state == RowState::Deleted,
            ApplyPhase::Upserts => matches!(state, RowState::Inserted | RowState::Updated),
        }
    }
}

/// Inputs identifying who sent a batch.
#[derive(Debug, Clone, Copy)]
pub struct ApplyContext {
    /// Scope recorded as updater of applied rows.
    pub sender_scope_id: Uuid,
    /// Highest local timestamp the sender has seen.
    pub last_known_timestamp: i64,
    /// Policy for conflicts.
    pub policy: ConflictResolutionPolicy,
}

/// Applies a batch of remote changes to a store.
pub struct ChangeApplier<'a> {
    store: &'a dyn DataStore,
    setup: &'a SyncSetup,
    options: &'a SyncOptions,
    resolver: &'a ConflictResolver,
}

impl<'a> ChangeApplier<'a> {
    /// Creates an applier.
    pub fn new(
        store: &'a dyn DataStore,
        setup: &'a SyncSetup,
        options: &'a SyncOptions,
        resolver: &'a ConflictResolver,
    ) -> Self {
        Self {
            store,
            setup,
            options,
            resolver,
        }
    }

    /// Applies every part of `batch`.
    pub fn apply(
        &self,
        batch: &BatchInfo,
        ctx: ApplyContext,
        cancel: &CancellationToken,
    ) -> SyncResult<DatabaseChangesApplied> {
        if let Some(unknown) = batch
            .manifest()
            .parts
            .iter()
            .flat_map(|p| &p.tables)
            .find(|t| self.setup.table(&t.name).is_none())
        {
            return Err(SyncError::invalid_batch(format!(
                "batch holds rows for unknown table `{}`",
                unknown.name
            )));
        }

        let mut applied = DatabaseChangesApplied::default();
        cancel.check()?;
        if batch.row_count() == 0 {
            return Ok(applied);
        }

        let passes: Vec<(ApplyPhase, &TableSchema)> = self
            .setup
            .reverse()
            .map(|t| (ApplyPhase::Deletes, t))
            .chain(self.setup.forward().map(|t| (ApplyPhase::Upserts, t)))
            .collect();

        match self.options.transaction_mode {
            TransactionMode::AllOrNothing => {
                self.in_transaction(|txn| {
                    for (phase, table) in &passes {
                        applied.merge(self.apply_table(txn, batch, table, *phase, ctx)?);
                    }
                    Ok(())
                })?;
            }
            TransactionMode::PerTable => {
                for (phase, table) in &passes {
                    cancel.check()?;
                    let stats = self
                        .in_transaction(|txn| self.apply_table(txn, batch, table, *phase, ctx))?;
                    applied.merge(stats);
                }
            }
        }

        tracing::debug!(
            sender = %ctx.sender_scope_id,
            applied = applied.total_applied(),
            resolved = applied.total_resolved_conflicts(),
            failed = applied.total_failed(),
            "changes applied"
        );
        Ok(applied)
    }

    fn in_transaction<T>(&self, f: impl FnOnce(&Transaction) -> SyncResult<T>) -> SyncResult<T> {
        let scope = TransactionScope::begin(self.store, self.options.isolation_level)?;
        let guard = if self.options.disable_constraints_on_apply {
            Some(ConstraintsGuard::disable(self.store, scope.txn())?)
        } else {
            None
        };
        let value = f(scope.txn())?;
        if let Some(guard) = guard {
            guard.release()?;
        }
        scope.commit()?;
        Ok(value)
    }

    /// Applies one table's rows for one phase inside `txn`.
    ///
    /// Parts are decoded and applied one at a time, in order.
    pub fn apply_table(
        &self,
        txn: &Transaction,
        batch: &BatchInfo,
        table: &TableSchema,
        phase: ApplyPhase,
        ctx: ApplyContext,
    ) -> SyncResult<TableChangesApplied> {
        let mut stats = TableChangesApplied::new(table.name());
        for (position, info) in batch.manifest().parts.iter().enumerate() {
            if !info.tables.iter().any(|t| t.name == table.name()) {
                continue;
            }
            let rows: Vec<SyncRow> = batch
                .part(position)?
                .tables
                .into_iter()
                .filter(|t| t.table == table.name())
                .flat_map(|t| t.rows)
                .filter(|r| phase.includes(r.state))
                .collect();
            if rows.is_empty() {
                continue;
            }
            let part_stats = self.apply_part(txn, table, &rows, ctx)?;
            stats.absorb(&part_stats);
        }

        if stats.processed() > 0 {
            tracing::debug!(
                table = table.name(),
                ?phase,
                inserts = stats.inserts,
                updates = stats.updates,
                deletes = stats.deletes,
                conflicts = stats.resolved_conflicts + stats.failed,
                "table changes applied"
            );
        }
        Ok(stats)
    }

    fn apply_part(
        &self,
        txn: &Transaction,
        table: &TableSchema,
        rows: &[SyncRow],
        ctx: ApplyContext,
    ) -> SyncResult<TableChangesApplied> {
        let (mut stats, conflicts) =
            self.apply_rows(txn, table, rows, ctx.sender_scope_id, ctx.last_known_timestamp)?;
        for conflict in conflicts {
            let outcome = self.resolver.resolve_and_apply(
                self.store,
                txn,
                table,
                &conflict,
                ctx.policy,
                ctx.sender_scope_id,
            )?;
            match outcome {
                RowOutcome::Applied(state) => stats.record_applied(state),
                RowOutcome::Resolved => stats.resolved_conflicts += 1,
                RowOutcome::RolledBack => {
                    stats.failed += 1;
                    if self.options.error_policy == ErrorPolicy::Throw {
                        return Err(SyncError::ConflictRollback {
                            table: table.name().to_string(),
                            key: conflict_key(table, &conflict),
                        });
                    }
                }
                RowOutcome::Failed(reason) => {
                    stats.failed += 1;
                    tracing::warn!(table = table.name(), %reason, "row could not be applied");
                    if self.options.error_policy == ErrorPolicy::Throw {
                        return Err(SyncError::RowApplyFailed {
                            table: table.name().to_string(),
                            key: conflict_key(table, &conflict),
                            reason,
                        });
                    }
                }
            }
        }
        Ok(stats)
    }

    /// Writes `rows` optimistically in slices of the bulk size.
    ///
    /// Returns the counts of rows that landed and the conflicts for the
    /// refused ones. Nothing is resolved here. Rows repeating a key are
    /// written and counted each time.
    pub fn apply_rows(
        &self,
        txn: &Transaction,
        table: &TableSchema,
        rows: &[SyncRow],
        sender: Uuid,
        last_known_timestamp: i64,
    ) -> SyncResult<(TableChangesApplied, Vec<SyncConflict>)> {
        let mut stats = TableChangesApplied::new(table.name());
        let mut conflicts = Vec::new();

        for slice in rows.chunks(self.options.bulk_batch_max_size.max(1)) {
            let mut written: Vec<&SyncRow> = Vec::with_capacity(slice.len());
            let mut requests = Vec::with_capacity(slice.len());
            for row in slice {
                if row.row.primary_key(table).is_none() {
                    return Err(SyncError::MissingPrimaryKey {
                        table: table.name().to_string(),
                    });
                }
                let Some(op) = WriteOp::for_state(row.state) else {
                    continue;
                };
                written.push(row);
                requests.push(WriteRequest::new(
                    op,
                    row.row.clone(),
                    last_known_timestamp,
                    Some(sender),
                ));
            }

            let mut refused = vec![false; written.len()];
            for (index, rejection) in self.store.write_rows(txn, table, &requests)? {
                let Some(remote) = written.get(index) else {
                    continue;
                };
                conflicts.push(self.conflict_for(txn, table, remote, rejection)?);
                refused[index] = true;
            }
            for (row, refused) in written.iter().zip(refused) {
                if !refused {
                    stats.record_applied(row.state);
                }
            }
        }
        Ok((stats, conflicts))
    }

    fn conflict_for(
        &self,
        txn: &Transaction,
        table: &TableSchema,
        remote: &SyncRow,
        rejection: Rejection,
    ) -> SyncResult<SyncConflict> {
        let key = remote.row.primary_key(table).ok_or_else(|| SyncError::MissingPrimaryKey {
            table: table.name().to_string(),
        })?;
        let local = self.store.read_row(txn, table, &key)?;
        let local_state = match &local {
            None => LocalRowState::NotExists,
            Some(row) if row.metadata.is_tombstone => LocalRowState::IsDeleted,
            Some(_) => LocalRowState::Exists,
        };
        let (conflict_type, error_message) = match rejection {
            Rejection::Concurrency => (ConflictType::classify(remote.state, local_state), None),
            Rejection::UniqueConstraint { .. } => (ConflictType::UniqueKeyConstraint, None),
            Rejection::Constraint { message } => (ConflictType::ErrorsOccurred, Some(message)),
        };
        tracing::debug!(table = table.name(), %key, conflict = %conflict_type, "conflict detected");
        Ok(SyncConflict {
            table: table.name().to_string(),
            conflict_type,
            local_row: local.filter(|r| !r.metadata.is_tombstone).map(|r| r.row),
            remote_row: Some(remote.row.clone()),
            error_message,
        })
    }
}

fn conflict_key(table: &TableSchema, conflict: &SyncConflict) -> String {
    conflict
        .remote_row
        .as_ref()
        .and_then(|r| r.primary_key(table))
        .map_or_else(|| "(unknown)".to_string(), |k| k.to_string())
}
