//! Prune command implementation.

use chrono::{DateTime, Duration, Utc};
use scopesync_engine::BatchInfo;
use std::path::{Path, PathBuf};

/// Batches selected for removal.
#[derive(Debug, Default)]
pub struct PruneResult {
    /// Directories removed, or that would be removed in a dry run.
    pub removed: Vec<PathBuf>,
    /// Directories kept because they are too recent.
    pub kept: usize,
    /// Directories whose manifest could not be read.
    pub unreadable: Vec<PathBuf>,
}

/// Runs the prune command.
pub fn run(
    root: &Path,
    older_than_minutes: i64,
    dry_run: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let cutoff = Utc::now() - Duration::minutes(older_than_minutes);
    let result = prune(root, cutoff, dry_run)?;

    let verb = if dry_run { "Would remove" } else { "Removed" };
    for dir in &result.removed {
        println!("{verb} {}", dir.display());
    }
    for dir in &result.unreadable {
        println!("Skipped unreadable batch {}", dir.display());
    }
    println!();
    println!("{verb} {} batch(es), kept {}", result.removed.len(), result.kept);
    Ok(())
}

/// Removes batch directories under `root` created before `cutoff`.
pub fn prune(root: &Path, cutoff: DateTime<Utc>, dry_run: bool) -> std::io::Result<PruneResult> {
    let mut result = PruneResult::default();
    for dir in super::batch_directories(root)? {
        let batch = match BatchInfo::load(&dir) {
            Ok(batch) => batch,
            Err(e) => {
                tracing::warn!(dir = %dir.display(), error = %e, "cannot read batch manifest");
                result.unreadable.push(dir);
                continue;
            }
        };
        if batch.manifest().created_at >= cutoff {
            result.kept += 1;
            continue;
        }
        if !dry_run {
            std::fs::remove_dir_all(&dir)?;
            tracing::debug!(dir = %dir.display(), "removed batch directory");
        }
        result.removed.push(dir);
    }
    Ok(result)
}
