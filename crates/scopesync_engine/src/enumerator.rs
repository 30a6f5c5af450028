//! Change selection.

use crate::batch::{BatchAccumulator, BatchInfo};
use crate::cancel::CancellationToken;
use crate::config::SyncOptions;
use crate::error::{SyncError, SyncResult};
use crate::oracle::RowVersionOracle;
use scopesync_codec::Value;
use scopesync_protocol::{
    DatabaseChangesSelected, Row, RowFilter, ScopeInfo, SyncDirection, SyncParameters, SyncRow,
    SyncSetup, TableChangesSelected, TableSchema, TrackedRow,
};
use scopesync_store::{DataStore, TransactionScope};
use uuid::Uuid;

/// Reads tracked rows, classifies them for a requesting scope and batches
/// the selected ones.
pub struct ChangeEnumerator<'a> {
    store: &'a dyn DataStore,
    setup: &'a SyncSetup,
    options: &'a SyncOptions,
}

impl<'a> ChangeEnumerator<'a> {
    /// Creates an enumerator.
    pub fn new(store: &'a dyn DataStore, setup: &'a SyncSetup, options: &'a SyncOptions) -> Self {
        Self {
            store,
            setup,
            options,
        }
    }

    /// Selects every change `scope` has not seen, in parent-first table order.
    ///
    /// Returns the finalized batch and per-table selection counts. On failure
    /// any spooled part files are removed.
    pub fn enumerate(
        &self,
        scope: &ScopeInfo,
        direction: SyncDirection,
        parameters: &SyncParameters,
        session_id: Uuid,
        cancel: &CancellationToken,
    ) -> SyncResult<(BatchInfo, DatabaseChangesSelected)> {
        let mut acc = BatchAccumulator::spooled(
            session_id,
            self.options.codec,
            self.options.batch_size,
            &self.options.batch_directory,
        );
        let mut selected = DatabaseChangesSelected::default();

        let result = self.setup.forward().try_for_each(|table| {
            cancel.check()?;
            if !table.sync_direction().allows(direction) {
                tracing::debug!(table = table.name(), ?direction, "table skipped for direction");
                return Ok(());
            }
            let counts = self.enumerate_table(table, scope, direction, parameters, &mut acc)?;
            selected.push(counts);
            Ok(())
        });
        if let Err(e) = result {
            if let Err(cleanup) = acc.discard() {
                tracing::warn!(error = %cleanup, "failed to remove partial batch");
            }
            return Err(e);
        }

        let batch = acc.finalize()?;
        tracing::debug!(
            scope = %scope.name,
            ?direction,
            rows = batch.row_count(),
            parts = batch.manifest().parts.len(),
            "changes selected"
        );
        Ok((batch, selected))
    }

    /// Selects the changes of one table inside its own read transaction.
    pub fn enumerate_table(
        &self,
        table: &TableSchema,
        scope: &ScopeInfo,
        direction: SyncDirection,
        parameters: &SyncParameters,
        acc: &mut BatchAccumulator,
    ) -> SyncResult<TableChangesSelected> {
        let oracle = RowVersionOracle::new(scope, direction);
        let since = if scope.is_new {
            None
        } else {
            Some(scope.last_sync_timestamp)
        };
        let filters: Vec<&RowFilter> = parameters.for_table(table.name()).collect();
        let columns: Vec<String> = table.columns().iter().map(|c| c.name.clone()).collect();
        let mut counts = TableChangesSelected::new(table.name());

        let txn = TransactionScope::begin(self.store, self.options.isolation_level)?;
        for tracked in self.store.read_tracked_rows(txn.txn(), table, since, &filters)? {
            let TrackedRow { row, metadata } = tracked?;
            if row.primary_key(table).is_none() {
                return Err(SyncError::MissingPrimaryKey {
                    table: table.name().to_string(),
                });
            }
            let state = oracle.classify(&metadata);
            if !state.is_selected() {
                continue;
            }
            let values = if metadata.is_tombstone {
                row.key_projection(table)
            } else {
                check_types(table, &row)?;
                row.project(&columns)
            };
            counts.record(state);
            acc.add(table.name(), SyncRow::new(state, values))?;
        }
        txn.commit()?;

        tracing::debug!(
            table = table.name(),
            inserts = counts.inserts,
            updates = counts.updates,
            deletes = counts.deletes,
            "table changes selected"
        );
        Ok(counts)
    }
}

fn check_types(table: &TableSchema, row: &Row) -> SyncResult<()> {
    for column in table.columns() {
        let value = row.get(&column.name).unwrap_or(&Value::Null);
        if !column.accepts(value) {
            return Err(SyncError::ColumnTypeMismatch {
                table: table.name().to_string(),
                column: column.name.clone(),
                expected: column.column_type.name().to_string(),
                found: value.kind_name(),
            });
        }
    }
    Ok(())
}
