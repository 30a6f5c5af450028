//! Session orchestration for both sides of a sync.
//!
//! A session runs in this order:
//!
//! 1. the client locks its scope and loads its watermark
//! 2. the client selects its changes since that watermark
//! 3. the server applies them, then selects what the client has not seen
//! 4. the client applies the download with the reversed policy
//! 5. the server records the client's new reference watermark
//! 6. the client records its own watermark
//!
//! A failure at any point leaves both watermarks where they were, so the
//! next session selects the same changes again.

use crate::applier::{ApplyContext, ChangeApplier};
use crate::batch::BatchInfo;
use crate::cancel::CancellationToken;
use crate::config::SyncOptions;
use crate::enumerator::ChangeEnumerator;
use crate::error::{StageExt, SyncError, SyncResult};
use crate::resolver::{ConflictInterceptor, ConflictResolver};
use crate::scope::{ScopeLocks, ScopeTracker};
use crate::state::{SyncState, SyncSummary};
use crate::transport::{ApplyChangesRequest, ApplyChangesResponse, SyncTransport};
use chrono::Utc;
use scopesync_protocol::{ScopeInfo, SyncDirection, SyncParameters, SyncSetup, SyncStage};
use scopesync_store::{DataStore, IsolationLevel, TransactionScope};
use std::sync::Arc;
use uuid::Uuid;

fn store_timestamp(store: &dyn DataStore, isolation: IsolationLevel) -> SyncResult<i64> {
    let scope = TransactionScope::begin(store, isolation)?;
    let ts = store.current_timestamp(scope.txn())?;
    scope.commit()?;
    Ok(ts)
}

fn cleanup_batches(batches: Vec<BatchInfo>) {
    for batch in batches {
        let dir = batch.directory().map(|d| d.display().to_string());
        if let Err(e) = batch.cleanup() {
            tracing::warn!(
                stage = %SyncStage::Cleanup,
                dir = ?dir,
                error = %e,
                "failed to remove batch directory"
            );
        }
    }
}

/// The server side of a scope: applies client uploads and answers with
/// server changes.
pub struct RemoteOrchestrator {
    store: Arc<dyn DataStore>,
    setup: SyncSetup,
    options: SyncOptions,
    scopes: ScopeTracker,
    locks: Arc<ScopeLocks>,
    resolver: ConflictResolver,
}

impl RemoteOrchestrator {
    /// Creates a server orchestrator.
    pub fn new(store: Arc<dyn DataStore>, setup: SyncSetup, options: SyncOptions) -> Self {
        Self {
            scopes: ScopeTracker::new(Arc::clone(&store)),
            locks: ScopeLocks::new(Arc::clone(&store)),
            store,
            setup,
            options,
            resolver: ConflictResolver::new(),
        }
    }

    /// Installs a conflict interceptor for uploads.
    pub fn with_interceptor(mut self, interceptor: impl ConflictInterceptor + 'static) -> Self {
        self.resolver = ConflictResolver::new().with_interceptor(interceptor);
        self
    }

    /// Session options.
    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    /// Per-client session guards.
    pub fn locks(&self) -> &Arc<ScopeLocks> {
        &self.locks
    }

    /// Key under which a client's server session is guarded.
    pub fn session_key(scope_name: &str, client_id: Uuid) -> String {
        format!("{scope_name}/{client_id}")
    }

    fn applier(&self) -> ChangeApplier<'_> {
        ChangeApplier::new(self.store.as_ref(), &self.setup, &self.options, &self.resolver)
    }

    fn enumerator(&self) -> ChangeEnumerator<'_> {
        ChangeEnumerator::new(self.store.as_ref(), &self.setup, &self.options)
    }
}

impl SyncTransport for RemoteOrchestrator {
    fn ensure_scope(&self, scope_name: &str) -> SyncResult<ScopeInfo> {
        self.scopes.load_or_create(scope_name).stage(SyncStage::ScopeLoading)
    }

    fn apply_then_get_changes(
        &self,
        request: ApplyChangesRequest<'_>,
    ) -> SyncResult<ApplyChangesResponse> {
        let _guard = self
            .locks
            .acquire(Self::session_key(request.scope_name, request.client_id))
            .stage(SyncStage::BeginSession)?;

        let server = self.scopes.load_or_create(request.scope_name).stage(SyncStage::ScopeLoading)?;
        let reference = self
            .scopes
            .load_or_new_client(request.scope_name, request.client_id)
            .stage(SyncStage::ScopeLoading)?;
        let horizon = self.store.cleanup_horizon().stage(SyncStage::ScopeLoading)?;
        if !reference.is_new && reference.last_sync_timestamp < horizon {
            return Err::<ApplyChangesResponse, _>(SyncError::OutOfDate {
                client_id: request.client_id,
                last_sync_timestamp: reference.last_sync_timestamp,
                horizon,
            })
            .stage(SyncStage::ScopeLoading);
        }

        let applied = self
            .applier()
            .apply(
                request.batch,
                ApplyContext {
                    sender_scope_id: request.client_id,
                    last_known_timestamp: reference.last_sync_timestamp,
                    policy: self.options.conflict_resolution_policy,
                },
                request.cancel,
            )
            .stage(SyncStage::ChangesApplying)?;

        let server_timestamp = store_timestamp(self.store.as_ref(), self.options.isolation_level)
            .stage(SyncStage::ChangesSelecting)?;
        let (batch, selected) = self
            .enumerator()
            .enumerate(
                &reference.as_requesting_scope(),
                SyncDirection::Download,
                request.parameters,
                Uuid::new_v4(),
                request.cancel,
            )
            .stage(SyncStage::ChangesSelecting)?;

        tracing::info!(
            scope = request.scope_name,
            client = %request.client_id,
            uploaded = applied.total_applied(),
            download = selected.total(),
            server_timestamp,
            "client changes applied"
        );
        Ok(ApplyChangesResponse {
            server_scope_id: server.id,
            batch,
            applied,
            selected,
            server_timestamp,
        })
    }

    fn end_session(
        &self,
        scope_name: &str,
        client_id: Uuid,
        server_timestamp: i64,
    ) -> SyncResult<()> {
        let mut reference = self
            .scopes
            .load_or_new_client(scope_name, client_id)
            .stage(SyncStage::ScopeWriting)?;
        let now = Utc::now();
        reference.mark_synced(server_timestamp.max(reference.last_sync_timestamp), now);
        self.scopes.save_client(&reference).stage(SyncStage::ScopeWriting)?;

        self.scopes
            .advance(scope_name, server_timestamp, now)
            .stage(SyncStage::ScopeWriting)?;
        tracing::debug!(
            scope = scope_name,
            client = %client_id,
            server_timestamp,
            "client reference scope saved"
        );
        Ok(())
    }
}

/// The client side of a scope.
pub struct LocalOrchestrator {
    store: Arc<dyn DataStore>,
    setup: SyncSetup,
    options: SyncOptions,
    scopes: ScopeTracker,
    locks: Arc<ScopeLocks>,
    resolver: ConflictResolver,
}

impl LocalOrchestrator {
    /// Creates a client orchestrator.
    pub fn new(store: Arc<dyn DataStore>, setup: SyncSetup, options: SyncOptions) -> Self {
        Self {
            scopes: ScopeTracker::new(Arc::clone(&store)),
            locks: ScopeLocks::new(Arc::clone(&store)),
            store,
            setup,
            options,
            resolver: ConflictResolver::new(),
        }
    }

    /// Installs a conflict interceptor for downloads.
    pub fn with_interceptor(mut self, interceptor: impl ConflictInterceptor + 'static) -> Self {
        self.resolver = ConflictResolver::new().with_interceptor(interceptor);
        self
    }

    /// Session options.
    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    /// Per-scope session guards.
    pub fn locks(&self) -> &Arc<ScopeLocks> {
        &self.locks
    }

    /// Loads this client's scope record.
    pub fn scope(&self, scope_name: &str) -> SyncResult<ScopeInfo> {
        self.scopes.load_or_create(scope_name)
    }

    fn applier(&self) -> ChangeApplier<'_> {
        ChangeApplier::new(self.store.as_ref(), &self.setup, &self.options, &self.resolver)
    }

    fn enumerator(&self) -> ChangeEnumerator<'_> {
        ChangeEnumerator::new(self.store.as_ref(), &self.setup, &self.options)
    }

    /// Runs one full session against `transport`.
    ///
    /// `on_state` observes the upload and download phases. Spooled batches
    /// are removed at the end when configured, whether the session
    /// succeeded or not.
    pub fn synchronize(
        &self,
        scope_name: &str,
        parameters: &SyncParameters,
        transport: &dyn SyncTransport,
        cancel: &CancellationToken,
        on_state: &dyn Fn(SyncState),
    ) -> SyncResult<SyncSummary> {
        let _guard = self.locks.acquire(scope_name).stage(SyncStage::BeginSession)?;
        let session_id = Uuid::new_v4();
        on_state(SyncState::BeginSession);
        tracing::info!(scope = scope_name, session = %session_id, "sync session started");

        let mut batches = Vec::new();
        let result = self.run_session(
            session_id,
            scope_name,
            parameters,
            transport,
            cancel,
            on_state,
            &mut batches,
        );
        if self.options.cleanup_batch_directories {
            cleanup_batches(batches);
        }

        match &result {
            Ok(summary) => tracing::info!(
                scope = scope_name,
                session = %session_id,
                uploaded = summary.upload_applied.total_applied(),
                downloaded = summary.download_applied.total_applied(),
                resolved = summary.total_resolved_conflicts(),
                failed = summary.total_failed(),
                "sync session completed"
            ),
            Err(e) => tracing::warn!(
                scope = scope_name,
                session = %session_id,
                error = %e,
                "sync session failed"
            ),
        }
        result
    }

    #[allow(clippy::too_many_arguments)]
    fn run_session(
        &self,
        session_id: Uuid,
        scope_name: &str,
        parameters: &SyncParameters,
        transport: &dyn SyncTransport,
        cancel: &CancellationToken,
        on_state: &dyn Fn(SyncState),
        batches: &mut Vec<BatchInfo>,
    ) -> SyncResult<SyncSummary> {
        let started_at = Utc::now();
        let client = self.scopes.load_or_create(scope_name).stage(SyncStage::ScopeLoading)?;
        let server = transport.ensure_scope(scope_name).stage(SyncStage::ScopeLoading)?;

        cancel.check().stage(SyncStage::ChangesSelecting)?;
        on_state(SyncState::Uploading);
        let client_timestamp = store_timestamp(self.store.as_ref(), self.options.isolation_level)
            .stage(SyncStage::ChangesSelecting)?;
        let upload_scope =
            ScopeInfo::requesting(server.id, scope_name, client.last_sync_timestamp, client.is_new);
        let (upload, upload_selected) = self
            .enumerator()
            .enumerate(&upload_scope, SyncDirection::Upload, parameters, session_id, cancel)
            .stage(SyncStage::ChangesSelecting)?;

        cancel.check().stage(SyncStage::ChangesApplying)?;
        let response = transport.apply_then_get_changes(ApplyChangesRequest {
            scope_name,
            client_id: client.id,
            batch: &upload,
            parameters,
            cancel,
        });
        batches.push(upload);
        let ApplyChangesResponse {
            server_scope_id,
            batch: download,
            applied: upload_applied,
            selected: download_selected,
            server_timestamp,
        } = response.stage(SyncStage::ChangesApplying)?;

        on_state(SyncState::Downloading);
        let download_applied = self
            .applier()
            .apply(
                &download,
                ApplyContext {
                    sender_scope_id: server_scope_id,
                    last_known_timestamp: client.last_sync_timestamp,
                    policy: self.options.conflict_resolution_policy.reversed(),
                },
                cancel,
            );
        batches.push(download);
        let download_applied = download_applied.stage(SyncStage::ChangesApplying)?;

        cancel.check().stage(SyncStage::EndSession)?;
        transport
            .end_session(scope_name, client.id, server_timestamp)
            .stage(SyncStage::EndSession)?;

        let completed_at = Utc::now();
        self.scopes
            .advance(scope_name, client_timestamp, completed_at)
            .stage(SyncStage::ScopeWriting)?;

        Ok(SyncSummary {
            session_id,
            scope_name: scope_name.to_string(),
            started_at,
            completed_at,
            upload_selected,
            upload_applied,
            download_selected,
            download_applied,
        })
    }
}
