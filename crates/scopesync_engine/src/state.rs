//! Sync agent state machine.

use crate::cancel::CancellationToken;
use crate::config::RetryPolicy;
use crate::error::{SyncError, SyncResult};
use crate::orchestrator::LocalOrchestrator;
use crate::transport::SyncTransport;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use scopesync_protocol::{DatabaseChangesApplied, DatabaseChangesSelected, SyncParameters};
use uuid::Uuid;

/// The current state of a sync agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// Not syncing.
    Idle,
    /// Session guard taken, scopes loading.
    BeginSession,
    /// Selecting and sending local changes.
    Uploading,
    /// Applying server changes.
    Downloading,
    /// The last session completed.
    Synced,
    /// The last session failed.
    Error,
    /// Waiting before a retry.
    RetryWait,
}

impl SyncState {
    /// Returns true while a session is running.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SyncState::BeginSession | SyncState::Uploading | SyncState::Downloading
        )
    }

    /// Returns true if a new session may start.
    pub fn can_start_sync(&self) -> bool {
        matches!(
            self,
            SyncState::Idle | SyncState::Synced | SyncState::Error | SyncState::RetryWait
        )
    }
}

/// Statistics of one completed session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSummary {
    /// Session identifier.
    pub session_id: Uuid,
    /// Scope synchronized.
    pub scope_name: String,
    /// When the session started.
    pub started_at: DateTime<Utc>,
    /// When the session completed.
    pub completed_at: DateTime<Utc>,
    /// Local changes selected for upload.
    pub upload_selected: DatabaseChangesSelected,
    /// Outcome of the upload on the server.
    pub upload_applied: DatabaseChangesApplied,
    /// Server changes selected for download.
    pub download_selected: DatabaseChangesSelected,
    /// Outcome of the download locally.
    pub download_applied: DatabaseChangesApplied,
}

impl SyncSummary {
    /// Conflicts resolved without a write, both directions.
    pub fn total_resolved_conflicts(&self) -> usize {
        self.upload_applied.total_resolved_conflicts()
            + self.download_applied.total_resolved_conflicts()
    }

    /// Rows that failed, both directions.
    pub fn total_failed(&self) -> usize {
        self.upload_applied.total_failed() + self.download_applied.total_failed()
    }

    /// Wall-clock duration.
    pub fn duration(&self) -> chrono::Duration {
        self.completed_at - self.started_at
    }
}

/// Runs sessions for one scope and tracks their state.
pub struct SyncAgent<T: SyncTransport> {
    local: LocalOrchestrator,
    transport: T,
    scope_name: String,
    parameters: SyncParameters,
    retry: RetryPolicy,
    state: RwLock<SyncState>,
    cancel: CancellationToken,
    last_summary: RwLock<Option<SyncSummary>>,
    last_error: RwLock<Option<String>>,
}

impl<T: SyncTransport> SyncAgent<T> {
    /// Creates an agent.
    pub fn new(local: LocalOrchestrator, transport: T, scope_name: impl Into<String>) -> Self {
        Self {
            local,
            transport,
            scope_name: scope_name.into(),
            parameters: SyncParameters::default(),
            retry: RetryPolicy::default(),
            state: RwLock::new(SyncState::Idle),
            cancel: CancellationToken::new(),
            last_summary: RwLock::new(None),
            last_error: RwLock::new(None),
        }
    }

    /// Sets the row filter values.
    pub fn with_parameters(mut self, parameters: SyncParameters) -> Self {
        self.parameters = parameters;
        self
    }

    /// Sets the retry policy used by [`SyncAgent::sync_with_retry`].
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Gets the current state.
    pub fn state(&self) -> SyncState {
        *self.state.read()
    }

    /// Summary of the last successful session.
    pub fn last_summary(&self) -> Option<SyncSummary> {
        self.last_summary.read().clone()
    }

    /// Message of the last failure.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    /// Token that cancels the running session.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Cancels the running session at its next phase boundary.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// The transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    fn set_state(&self, state: SyncState) {
        *self.state.write() = state;
    }

    /// Runs one session.
    pub fn sync(&self) -> SyncResult<SyncSummary> {
        let current = self.state();
        if !current.can_start_sync() {
            return Err(SyncError::InvalidStateTransition {
                from: format!("{current:?}"),
                to: format!("{:?}", SyncState::BeginSession),
            });
        }
        self.cancel.reset();

        let result = self.local.synchronize(
            &self.scope_name,
            &self.parameters,
            &self.transport,
            &self.cancel,
            &|state| self.set_state(state),
        );
        match &result {
            Ok(summary) => {
                self.set_state(SyncState::Synced);
                *self.last_summary.write() = Some(summary.clone());
                *self.last_error.write() = None;
            }
            Err(e) => {
                self.set_state(SyncState::Error);
                *self.last_error.write() = Some(e.to_string());
            }
        }
        result
    }

    /// Runs a session, retrying retryable failures with backoff.
    pub fn sync_with_retry(&self) -> SyncResult<SyncSummary> {
        let mut attempt = 0;
        loop {
            match self.sync() {
                Ok(summary) => return Ok(summary),
                Err(e) if e.is_retryable() && attempt + 1 < self.retry.max_attempts => {
                    attempt += 1;
                    let delay = self.retry.delay_for_attempt(attempt);
                    tracing::warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "sync failed, retrying"
                    );
                    self.set_state(SyncState::RetryWait);
                    std::thread::sleep(delay);
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_predicates() {
        assert!(SyncState::Idle.can_start_sync());
        assert!(SyncState::Error.can_start_sync());
        assert!(!SyncState::Uploading.can_start_sync());
        assert!(SyncState::Downloading.is_active());
        assert!(!SyncState::Synced.is_active());
    }
}
