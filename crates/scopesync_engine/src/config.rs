//! Configuration for sync sessions.

use scopesync_codec::CodecKind;
use scopesync_protocol::ConflictResolutionPolicy;
use scopesync_store::IsolationLevel;
use std::path::PathBuf;
use std::time::Duration;

/// What to do when a row ends up failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorPolicy {
    /// Count the row as failed and keep going.
    #[default]
    ContinueOnError,
    /// Abort the session.
    Throw,
}

/// Granularity of apply transactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransactionMode {
    /// One transaction for the whole apply pass.
    #[default]
    AllOrNothing,
    /// One transaction per table and phase.
    PerTable,
}

/// Options shared by both sides of a session.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Approximate byte budget per batch part. 0 keeps the whole changeset
    /// in one resident part.
    pub batch_size: usize,
    /// Root directory for spooled batch parts.
    pub batch_directory: PathBuf,
    /// Remove spooled directories when the session ends.
    pub cleanup_batch_directories: bool,
    /// Encoding of spooled part files.
    pub codec: CodecKind,
    /// Rows per bulk write.
    pub bulk_batch_max_size: usize,
    /// Conflict policy, stated from the server's point of view.
    pub conflict_resolution_policy: ConflictResolutionPolicy,
    /// Failed-row handling.
    pub error_policy: ErrorPolicy,
    /// Apply transaction granularity.
    pub transaction_mode: TransactionMode,
    /// Isolation for enumeration reads.
    pub isolation_level: IsolationLevel,
    /// Disable foreign keys for the apply pass.
    pub disable_constraints_on_apply: bool,
}

impl SyncOptions {
    /// Creates options with defaults.
    pub fn new() -> Self {
        Self {
            batch_size: 0,
            batch_directory: std::env::temp_dir().join("scopesync"),
            cleanup_batch_directories: true,
            codec: CodecKind::default(),
            bulk_batch_max_size: 1000,
            conflict_resolution_policy: ConflictResolutionPolicy::default(),
            error_policy: ErrorPolicy::default(),
            transaction_mode: TransactionMode::default(),
            isolation_level: IsolationLevel::default(),
            disable_constraints_on_apply: false,
        }
    }

    /// Sets the batch part budget in bytes.
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    /// Sets the spool root directory.
    pub fn with_batch_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.batch_directory = dir.into();
        self
    }

    /// Keeps or removes spooled directories at session end.
    pub fn with_cleanup_batch_directories(mut self, cleanup: bool) -> Self {
        self.cleanup_batch_directories = cleanup;
        self
    }

    /// Sets the part file codec.
    pub fn with_codec(mut self, codec: CodecKind) -> Self {
        self.codec = codec;
        self
    }

    /// Sets the bulk write slice size. Values below 1 are raised to 1.
    pub fn with_bulk_batch_max_size(mut self, size: usize) -> Self {
        self.bulk_batch_max_size = size.max(1);
        self
    }

    /// Sets the conflict policy.
    pub fn with_conflict_resolution_policy(mut self, policy: ConflictResolutionPolicy) -> Self {
        self.conflict_resolution_policy = policy;
        self
    }

    /// Sets the error policy.
    pub fn with_error_policy(mut self, policy: ErrorPolicy) -> Self {
        self.error_policy = policy;
        self
    }

    /// Sets the transaction mode.
    pub fn with_transaction_mode(mut self, mode: TransactionMode) -> Self {
        self.transaction_mode = mode;
        self
    }

    /// Sets the enumeration isolation level.
    pub fn with_isolation_level(mut self, level: IsolationLevel) -> Self {
        self.isolation_level = level;
        self
    }

    /// Brackets the apply pass with disabled constraints.
    pub fn with_disable_constraints_on_apply(mut self, disable: bool) -> Self {
        self.disable_constraints_on_apply = disable;
        self
    }
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self::new()
    }
}

/// Retry behavior for [`SyncAgent::sync_with_retry`](crate::SyncAgent::sync_with_retry).
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts, the first included.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub initial_delay: Duration,
    /// Upper bound on any delay.
    pub max_delay: Duration,
    /// Multiplier applied per further attempt.
    pub backoff_multiplier: f64,
}

impl RetryPolicy {
    /// Creates a policy with `max_attempts` and default delays.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }

    /// A single attempt.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
        }
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Delay before attempt `attempt` (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
        let secs = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        Duration::from_secs_f64(secs.min(self.max_delay.as_secs_f64()))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_builder() {
        let options = SyncOptions::new()
            .with_batch_size(4096)
            .with_codec(CodecKind::Json)
            .with_bulk_batch_max_size(0)
            .with_conflict_resolution_policy(ConflictResolutionPolicy::ClientWins)
            .with_error_policy(ErrorPolicy::Throw)
            .with_transaction_mode(TransactionMode::PerTable)
            .with_cleanup_batch_directories(false);

        assert_eq!(options.batch_size, 4096);
        assert_eq!(options.codec, CodecKind::Json);
        assert_eq!(options.bulk_batch_max_size, 1);
        assert_eq!(
            options.conflict_resolution_policy,
            ConflictResolutionPolicy::ClientWins
        );
        assert_eq!(options.error_policy, ErrorPolicy::Throw);
        assert_eq!(options.transaction_mode, TransactionMode::PerTable);
        assert!(!options.cleanup_batch_directories);
    }

    #[test]
    fn defaults() {
        let options = SyncOptions::default();
        assert_eq!(options.batch_size, 0);
        assert_eq!(options.bulk_batch_max_size, 1000);
        assert_eq!(options.isolation_level, IsolationLevel::Snapshot);
        assert!(options.cleanup_batch_directories);
        assert!(!options.disable_constraints_on_apply);
    }

    #[test]
    fn retry_delays_grow_and_cap() {
        let retry = RetryPolicy::new(5)
            .with_initial_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_millis(300));

        assert_eq!(retry.delay_for_attempt(0), Duration::ZERO);
        assert_eq!(retry.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(retry.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(retry.delay_for_attempt(3), Duration::from_millis(300));
        assert_eq!(RetryPolicy::no_retry().max_attempts, 1);
    }
}
