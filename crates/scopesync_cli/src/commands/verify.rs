//! Verify command implementation.

use scopesync_engine::BatchInfo;
use scopesync_protocol::MANIFEST_FILE_NAME;
use std::collections::BTreeSet;
use std::path::Path;

/// Verification result for one batch directory.
#[derive(Debug)]
pub struct VerifyResult {
    /// Number of parts checked.
    pub parts_checked: usize,
    /// Number of parts that decoded and matched the manifest.
    pub valid_parts: usize,
    /// List of errors found.
    pub errors: Vec<String>,
}

impl VerifyResult {
    fn new() -> Self {
        Self {
            parts_checked: 0,
            valid_parts: 0,
            errors: Vec::new(),
        }
    }

    /// Returns true if nothing was wrong.
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Runs the verify command on a batch directory or on a root holding several.
pub fn run(path: &Path, strict: bool) -> Result<(), Box<dyn std::error::Error>> {
    let dirs = if path.join(MANIFEST_FILE_NAME).is_file() {
        vec![path.to_path_buf()]
    } else {
        super::batch_directories(path)?
    };
    if dirs.is_empty() {
        return Err(format!("No batch found at {:?}", path).into());
    }

    let mut failed = 0;
    for dir in &dirs {
        println!("Checking {}...", dir.display());
        let result = verify(dir, strict);
        print_result(&result);
        if !result.is_ok() {
            failed += 1;
        }
    }

    println!();
    if failed == 0 {
        println!("✓ {} batch(es) verified", dirs.len());
        Ok(())
    } else {
        println!("✗ {failed} of {} batch(es) failed verification", dirs.len());
        Err("Verification failed".into())
    }
}

/// Checks one batch directory part by part.
///
/// With `strict`, files the manifest does not list are reported too.
pub fn verify(dir: &Path, strict: bool) -> VerifyResult {
    let mut result = VerifyResult::new();
    let batch = match BatchInfo::load(dir) {
        Ok(batch) => batch,
        Err(e) => {
            result.errors.push(format!("manifest: {e}"));
            return result;
        }
    };

    let mut rows = 0;
    for position in 0..batch.manifest().parts.len() {
        result.parts_checked += 1;
        match batch.part(position) {
            Ok(part) => {
                rows += part.row_count();
                result.valid_parts += 1;
            }
            Err(e) => {
                tracing::debug!(dir = %dir.display(), position, error = %e, "part check failed");
                result.errors.push(format!("part {position}: {e}"));
            }
        }
    }
    if result.valid_parts == result.parts_checked && rows != batch.row_count() {
        result
            .errors
            .push(format!("parts hold {rows} rows, manifest lists {}", batch.row_count()));
    }

    if strict {
        let listed: BTreeSet<&str> = batch
            .manifest()
            .parts
            .iter()
            .filter_map(|p| p.file_name.as_deref())
            .chain(std::iter::once(MANIFEST_FILE_NAME))
            .collect();
        match std::fs::read_dir(dir) {
            Ok(entries) => {
                for entry in entries.flatten() {
                    let name = entry.file_name().to_string_lossy().into_owned();
                    if !listed.contains(name.as_str()) {
                        result.errors.push(format!("unlisted file {name}"));
                    }
                }
            }
            Err(e) => result.errors.push(format!("listing failed: {e}")),
        }
    }
    result
}

fn print_result(result: &VerifyResult) {
    println!("  Parts checked: {}", result.parts_checked);
    println!("  Valid parts:   {}", result.valid_parts);
    if !result.errors.is_empty() {
        println!("  Errors:");
        for error in result.errors.iter().take(10) {
            println!("    - {}", error);
        }
        if result.errors.len() > 10 {
            println!("    ... and {} more", result.errors.len() - 10);
        }
    }
}
