//! CLI command implementations.

pub mod inspect;
pub mod prune;
pub mod verify;

use std::path::{Path, PathBuf};

/// Batch directories directly under `root`, sorted by name.
///
/// A directory counts as a batch when it holds a manifest.
pub fn batch_directories(root: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut dirs = Vec::new();
    for entry in std::fs::read_dir(root)? {
        let path = entry?.path();
        if path.join(scopesync_protocol::MANIFEST_FILE_NAME).is_file() {
            dirs.push(path);
        }
    }
    dirs.sort();
    Ok(dirs)
}
