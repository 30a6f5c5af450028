//! Conflict resolution.

use crate::error::SyncResult;
use scopesync_protocol::{
    ApplyAction, ConflictOutcome, ConflictResolution, ConflictResolutionPolicy, ConflictType,
    Row, RowState, SyncConflict, TableSchema,
};
use scopesync_store::{DataStore, Transaction, WriteOp, WriteRequest};
use std::fmt;
use uuid::Uuid;

/// Mutable view of a conflict handed to a [`ConflictInterceptor`].
#[derive(Debug)]
pub struct ConflictArgs<'a> {
    /// The conflict being resolved.
    pub conflict: &'a SyncConflict,
    /// Resolution to apply. Starts as the session policy.
    pub resolution: ConflictResolution,
    /// Row to write for [`ConflictResolution::MergeRow`].
    pub final_row: Option<Row>,
    /// Scope that sent the remote row.
    pub sender_scope_id: Uuid,
}

/// Hook that can override the resolution of each conflict.
pub trait ConflictInterceptor: Send + Sync {
    /// Inspects and optionally changes the resolution.
    fn on_conflict(&self, args: &mut ConflictArgs<'_>);
}

impl<F> ConflictInterceptor for F
where
    F: Fn(&mut ConflictArgs<'_>) + Send + Sync,
{
    fn on_conflict(&self, args: &mut ConflictArgs<'_>) {
        self(args)
    }
}

/// Terminal outcome of one conflicting row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowOutcome {
    /// A forced write landed, carrying the state it applied as.
    Applied(RowState),
    /// Resolved without a write.
    Resolved,
    /// The resolution abandoned the row.
    RolledBack,
    /// The row could not be applied.
    Failed(String),
}

/// Turns conflicts into actions and carries them out.
#[derive(Default)]
pub struct ConflictResolver {
    interceptor: Option<Box<dyn ConflictInterceptor>>,
}

impl fmt::Debug for ConflictResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConflictResolver")
            .field("interceptor", &self.interceptor.is_some())
            .finish()
    }
}

impl ConflictResolver {
    /// Resolver that only applies the session policy.
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs an interceptor.
    pub fn with_interceptor(mut self, interceptor: impl ConflictInterceptor + 'static) -> Self {
        self.interceptor = Some(Box::new(interceptor));
        self
    }

    /// Decides what to do with `conflict`.
    ///
    /// `ErrorsOccurred` conflicts default to a rollback, everything else to
    /// the policy. The interceptor runs last and may override either.
    pub fn resolve(
        &self,
        conflict: &SyncConflict,
        policy: ConflictResolutionPolicy,
        sender: Uuid,
    ) -> ConflictOutcome {
        let resolution = match conflict.conflict_type {
            ConflictType::ErrorsOccurred => ConflictResolution::Rollback,
            _ => policy.as_resolution(),
        };
        let mut args = ConflictArgs {
            conflict,
            resolution,
            final_row: None,
            sender_scope_id: sender,
        };
        if let Some(interceptor) = &self.interceptor {
            interceptor.on_conflict(&mut args);
        }

        let (action, final_row) = match args.resolution {
            ConflictResolution::ServerWins => (ApplyAction::Continue, None),
            ConflictResolution::ClientWins => {
                (ApplyAction::RetryWithForceWrite, conflict.remote_row.clone())
            }
            ConflictResolution::MergeRow => match args.final_row {
                Some(row) => (ApplyAction::RetryWithForceWrite, Some(row)),
                None => (ApplyAction::Rollback, None),
            },
            ConflictResolution::Rollback => (ApplyAction::Rollback, None),
        };
        ConflictOutcome {
            policy_applied: args.resolution,
            action,
            final_row,
        }
    }

    /// Resolves `conflict` and performs the resulting write inside `txn`.
    ///
    /// Rejections of the forced write count as a failed row; store failures
    /// propagate.
    pub fn resolve_and_apply(
        &self,
        store: &dyn DataStore,
        txn: &Transaction,
        table: &TableSchema,
        conflict: &SyncConflict,
        policy: ConflictResolutionPolicy,
        sender: Uuid,
    ) -> SyncResult<RowOutcome> {
        let outcome = self.resolve(conflict, policy, sender);
        tracing::debug!(
            table = table.name(),
            conflict = %conflict.conflict_type,
            resolution = ?outcome.policy_applied,
            "resolving conflict"
        );
        apply_outcome(store, txn, table, conflict, &outcome, sender)
    }
}

/// Carries out a resolved conflict.
pub fn apply_outcome(
    store: &dyn DataStore,
    txn: &Transaction,
    table: &TableSchema,
    conflict: &SyncConflict,
    outcome: &ConflictOutcome,
    sender: Uuid,
) -> SyncResult<RowOutcome> {
    match outcome.action {
        ApplyAction::Continue => return Ok(RowOutcome::Resolved),
        ApplyAction::Rollback => {
            return Ok(match &conflict.error_message {
                Some(message) => RowOutcome::Failed(message.clone()),
                None => RowOutcome::RolledBack,
            });
        }
        ApplyAction::RetryWithForceWrite => {}
    }

    let Some(row) = outcome.final_row.clone() else {
        return Ok(RowOutcome::Failed("no row to write".to_string()));
    };

    // A merged row is authored here so it flows back to the sender.
    let (op, author) = if outcome.policy_applied == ConflictResolution::MergeRow {
        (WriteOp::Update, None)
    } else {
        let op = match conflict.conflict_type {
            ConflictType::RemoteExistsLocalExists => WriteOp::Update,
            ConflictType::RemoteExistsLocalNotExists
            | ConflictType::RemoteExistsLocalIsDeleted
            | ConflictType::UniqueKeyConstraint => WriteOp::Insert,
            ConflictType::RemoteIsDeletedLocalExists => WriteOp::Delete,
            ConflictType::RemoteIsDeletedLocalNotExists
            | ConflictType::RemoteIsDeletedLocalIsDeleted => return Ok(RowOutcome::Resolved),
            ConflictType::ErrorsOccurred => {
                let reason = conflict
                    .error_message
                    .clone()
                    .unwrap_or_else(|| "unexpected row state".to_string());
                return Ok(RowOutcome::Failed(reason));
            }
        };
        (op, Some(sender))
    };

    let request = WriteRequest::forced(op, row, author);
    Ok(match store.write_row(txn, table, &request)? {
        Ok(_) => RowOutcome::Applied(match op {
            WriteOp::Insert => RowState::Inserted,
            WriteOp::Update => RowState::Updated,
            WriteOp::Delete => RowState::Deleted,
        }),
        Err(rejection) => {
            tracing::warn!(table = table.name(), %rejection, "forced write rejected");
            RowOutcome::Failed(rejection.to_string())
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use scopesync_protocol::{ColumnSchema, ColumnType};
    use scopesync_store::{IsolationLevel, MemoryStore, TransactionScope};

    fn table() -> TableSchema {
        TableSchema::new("item")
            .column(ColumnSchema::new("id", ColumnType::Integer).not_null())
            .column(ColumnSchema::new("name", ColumnType::Text))
            .primary_key(&["id"])
    }

    fn conflict(conflict_type: ConflictType, remote: Option<Row>) -> SyncConflict {
        SyncConflict {
            table: "item".into(),
            conflict_type,
            local_row: None,
            remote_row: remote,
            error_message: None,
        }
    }

    fn remote() -> Row {
        Row::new().with("id", 1).with("name", "remote")
    }

    #[test]
    fn policy_defaults() {
        let resolver = ConflictResolver::new();
        let c = conflict(ConflictType::RemoteExistsLocalExists, Some(remote()));

        let server = resolver.resolve(&c, ConflictResolutionPolicy::ServerWins, Uuid::nil());
        assert_eq!(server.action, ApplyAction::Continue);
        assert!(server.final_row.is_none());

        let client = resolver.resolve(&c, ConflictResolutionPolicy::ClientWins, Uuid::nil());
        assert_eq!(client.action, ApplyAction::RetryWithForceWrite);
        assert_eq!(client.final_row, Some(remote()));

        let broken = conflict(ConflictType::ErrorsOccurred, Some(remote()));
        let outcome = resolver.resolve(&broken, ConflictResolutionPolicy::ClientWins, Uuid::nil());
        assert_eq!(outcome.action, ApplyAction::Rollback);
    }

    #[test]
    fn interceptor_can_merge_or_roll_back() {
        let merge = ConflictResolver::new().with_interceptor(|args: &mut ConflictArgs<'_>| {
            args.resolution = ConflictResolution::MergeRow;
            args.final_row = Some(Row::new().with("id", 1).with("name", "merged"));
        });
        let c = conflict(ConflictType::RemoteExistsLocalExists, Some(remote()));
        let outcome = merge.resolve(&c, ConflictResolutionPolicy::ServerWins, Uuid::nil());
        assert_eq!(outcome.policy_applied, ConflictResolution::MergeRow);
        assert_eq!(outcome.action, ApplyAction::RetryWithForceWrite);

        let merge_without_row =
            ConflictResolver::new().with_interceptor(|args: &mut ConflictArgs<'_>| {
                args.resolution = ConflictResolution::MergeRow
            });
        let outcome =
            merge_without_row.resolve(&c, ConflictResolutionPolicy::ServerWins, Uuid::nil());
        assert_eq!(outcome.action, ApplyAction::Rollback);
    }

    #[test]
    fn merged_row_is_written_as_local() {
        let store = MemoryStore::new();
        store.create_table(table());
        store.insert_local("item", Row::new().with("id", 1).with("name", "local")).unwrap();

        let resolver = ConflictResolver::new().with_interceptor(|args: &mut ConflictArgs<'_>| {
            args.resolution = ConflictResolution::MergeRow;
            args.final_row = Some(Row::new().with("id", 1).with("name", "merged"));
        });
        let c = conflict(ConflictType::RemoteExistsLocalExists, Some(remote()));
        let scope = TransactionScope::begin(&store, IsolationLevel::Snapshot).unwrap();
        let outcome = resolver
            .resolve_and_apply(
                &store,
                scope.txn(),
                &table(),
                &c,
                ConflictResolutionPolicy::ServerWins,
                Uuid::from_u128(7),
            )
            .unwrap();
        scope.commit().unwrap();

        assert_eq!(outcome, RowOutcome::Applied(RowState::Updated));
        let row = store.get("item", &scopesync_protocol::PrimaryKey::single(1)).unwrap();
        assert_eq!(row.row.get("name").and_then(|v| v.as_text()), Some("merged"));
        assert_eq!(row.metadata.update_scope_id, None);
    }

    #[test]
    fn agreed_delete_is_resolved_without_write() {
        let store = MemoryStore::new();
        store.create_table(table());
        let key = Row::new().with("id", 1);
        let c = conflict(ConflictType::RemoteIsDeletedLocalNotExists, Some(key));
        let scope = TransactionScope::begin(&store, IsolationLevel::Snapshot).unwrap();
        let outcome = ConflictResolver::new()
            .resolve_and_apply(
                &store,
                scope.txn(),
                &table(),
                &c,
                ConflictResolutionPolicy::ClientWins,
                Uuid::nil(),
            )
            .unwrap();
        scope.commit().unwrap();
        assert_eq!(outcome, RowOutcome::Resolved);
        assert!(store.rows("item").is_empty());
    }
}
