//! Stress runs for concurrent sessions.
//!
//! Several clients write and synchronize against one hub at the same time.

use crate::fixtures::{item, SyncHub, TestClient};
use scopesync_engine::SyncOptions;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// Result of a stress test run.
#[derive(Debug, Clone)]
pub struct StressTestResult {
    /// Total sessions run.
    pub total_sessions: usize,
    /// Sessions that completed.
    pub successful_sessions: usize,
    /// Sessions that failed.
    pub failed_sessions: usize,
    /// Total duration.
    pub duration: Duration,
    /// Sessions per second.
    pub sessions_per_second: f64,
}

impl StressTestResult {
    /// Creates a new result.
    pub fn new(successful: usize, failed: usize, duration: Duration) -> Self {
        let total = successful + failed;
        let sessions_per_second = if duration.as_secs_f64() > 0.0 {
            total as f64 / duration.as_secs_f64()
        } else {
            0.0
        };

        Self {
            total_sessions: total,
            successful_sessions: successful,
            failed_sessions: failed,
            duration,
            sessions_per_second,
        }
    }

    /// Prints a summary of the run.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {} ===", name);
        println!("Total sessions: {}", self.total_sessions);
        println!("Successful: {}", self.successful_sessions);
        println!("Failed: {}", self.failed_sessions);
        println!("Duration: {:?}", self.duration);
        println!("Throughput: {:.2} sessions/sec", self.sessions_per_second);
    }
}

/// Configuration for stress runs.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Concurrent clients.
    pub clients: usize,
    /// Sessions per client.
    pub rounds: usize,
    /// Local inserts before each session.
    pub rows_per_round: usize,
    /// Client options.
    pub options: SyncOptions,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            clients: 4,
            rounds: 5,
            rows_per_round: 20,
            options: SyncOptions::default(),
        }
    }
}

/// Id of the `n`th row a client inserts; distinct across clients.
fn row_id(client: usize, n: usize) -> i64 {
    (client * 1_000_000 + n) as i64
}

/// Runs `config.clients` clients against an `item` hub, each inserting rows
/// and synchronizing `config.rounds` times from its own thread.
///
/// Returns the clients so callers can check convergence afterwards.
pub fn stress_concurrent_clients(
    hub: &SyncHub,
    config: &StressConfig,
) -> (Vec<TestClient>, StressTestResult) {
    let clients: Vec<TestClient> = (0..config.clients)
        .map(|_| hub.client_with(config.options.clone()))
        .collect();
    let successful = AtomicUsize::new(0);
    let failed = AtomicUsize::new(0);

    let start = Instant::now();
    thread::scope(|s| {
        for (c, client) in clients.iter().enumerate() {
            let successful = &successful;
            let failed = &failed;
            s.spawn(move || {
                for round in 0..config.rounds {
                    for n in 0..config.rows_per_round {
                        let id = row_id(c, round * config.rows_per_round + n);
                        let _ = client.store.insert_local("item", item(id, "stress", round as i64));
                    }
                    match client.sync(hub) {
                        Ok(_) => successful.fetch_add(1, Ordering::Relaxed),
                        Err(_) => failed.fetch_add(1, Ordering::Relaxed),
                    };
                }
            });
        }
    });

    let result = StressTestResult::new(
        successful.load(Ordering::Relaxed),
        failed.load(Ordering::Relaxed),
        start.elapsed(),
    );
    (clients, result)
}
