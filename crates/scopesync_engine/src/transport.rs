//! The seam between a client session and the server it syncs with.

use crate::batch::BatchInfo;
use crate::cancel::CancellationToken;
use crate::error::SyncResult;
use scopesync_protocol::{
    DatabaseChangesApplied, DatabaseChangesSelected, ScopeInfo, SyncParameters,
};
use uuid::Uuid;

/// The client's upload for one session.
#[derive(Debug)]
pub struct ApplyChangesRequest<'a> {
    /// Scope being synchronized.
    pub scope_name: &'a str,
    /// Identity of the client scope, recorded as sender of its rows.
    pub client_id: Uuid,
    /// Selected client changes.
    pub batch: &'a BatchInfo,
    /// Row filter values for the download.
    pub parameters: &'a SyncParameters,
    /// Session cancellation.
    pub cancel: &'a CancellationToken,
}

/// The server's answer to an upload.
#[derive(Debug)]
pub struct ApplyChangesResponse {
    /// Identity of the server scope, recorded as sender of its rows.
    pub server_scope_id: Uuid,
    /// Server changes the client has not seen.
    pub batch: BatchInfo,
    /// Outcome of applying the upload on the server.
    pub applied: DatabaseChangesApplied,
    /// What the server selected for download.
    pub selected: DatabaseChangesSelected,
    /// Server timestamp the download is consistent with.
    pub server_timestamp: i64,
}

/// Carries a client session to a server.
///
/// A session is `ensure_scope`, one `apply_then_get_changes` and, once the
/// client has applied the download, `end_session`. The server advances its
/// record of the client only in `end_session`, so a client that fails
/// between the two calls receives the same changes again next time.
pub trait SyncTransport: Send + Sync {
    /// Returns the server's scope, creating it on first use.
    fn ensure_scope(&self, scope_name: &str) -> SyncResult<ScopeInfo>;

    /// Applies the client's changes and selects the server's.
    fn apply_then_get_changes(
        &self,
        request: ApplyChangesRequest<'_>,
    ) -> SyncResult<ApplyChangesResponse>;

    /// Confirms the client applied the download up to `server_timestamp`.
    fn end_session(
        &self,
        scope_name: &str,
        client_id: Uuid,
        server_timestamp: i64,
    ) -> SyncResult<()>;
}

impl<T: SyncTransport + ?Sized> SyncTransport for std::sync::Arc<T> {
    fn ensure_scope(&self, scope_name: &str) -> SyncResult<ScopeInfo> {
        (**self).ensure_scope(scope_name)
    }

    fn apply_then_get_changes(
        &self,
        request: ApplyChangesRequest<'_>,
    ) -> SyncResult<ApplyChangesResponse> {
        (**self).apply_then_get_changes(request)
    }

    fn end_session(
        &self,
        scope_name: &str,
        client_id: Uuid,
        server_timestamp: i64,
    ) -> SyncResult<()> {
        (**self).end_session(scope_name, client_id, server_timestamp)
    }
}
