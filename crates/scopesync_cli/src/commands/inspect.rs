//! Inspect command implementation.

use scopesync_engine::BatchInfo;
use scopesync_protocol::{RowState, MANIFEST_FILE_NAME};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

/// Batch inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Batch directory.
    pub path: String,
    /// Session that produced the batch.
    pub session_id: String,
    /// Codec of the part files.
    pub codec: String,
    /// When the batch was created.
    pub created_at: String,
    /// Number of parts.
    pub part_count: usize,
    /// Number of rows.
    pub row_count: usize,
    /// Approximate row footprint in bytes.
    pub total_size: usize,
    /// Per-table statistics.
    pub tables: Vec<TableStats>,
    /// Part details (if requested).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parts: Option<Vec<PartStats>>,
}

/// Statistics for a single table.
#[derive(Debug, Default, Serialize)]
pub struct TableStats {
    /// Table name.
    pub name: String,
    /// Rows across all parts.
    pub rows: usize,
    /// Row states, filled only when parts were decoded.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub states: BTreeMap<&'static str, usize>,
}

/// Statistics for a single part.
#[derive(Debug, Serialize)]
pub struct PartStats {
    /// Part index.
    pub index: u32,
    /// Part file, if spooled.
    pub file_name: Option<String>,
    /// Number of rows.
    pub rows: usize,
    /// Approximate size in bytes.
    pub size: usize,
    /// Whether this is the final part.
    pub is_last: bool,
}

/// Runs the inspect command on a batch directory or on a root holding several.
pub fn run(
    path: &Path,
    decode_rows: bool,
    show_parts: bool,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let dirs = if path.join(MANIFEST_FILE_NAME).is_file() {
        vec![path.to_path_buf()]
    } else {
        super::batch_directories(path)?
    };
    if dirs.is_empty() {
        return Err(format!("No batch found at {:?}", path).into());
    }

    let mut results = Vec::with_capacity(dirs.len());
    for dir in &dirs {
        results.push(inspect(dir, decode_rows, show_parts)?);
    }

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&results)?),
        _ => results.iter().for_each(print_text_output),
    }
    Ok(())
}

/// Reads one batch directory.
pub fn inspect(
    dir: &Path,
    decode_rows: bool,
    show_parts: bool,
) -> Result<InspectResult, Box<dyn std::error::Error>> {
    let batch = BatchInfo::load(dir)?;
    let manifest = batch.manifest();
    tracing::debug!(dir = %dir.display(), parts = manifest.parts.len(), "inspecting batch");

    let mut tables: Vec<TableStats> = Vec::new();
    for info in manifest.parts.iter().flat_map(|p| &p.tables) {
        match tables.iter_mut().find(|t| t.name == info.name) {
            Some(stats) => stats.rows += info.row_count,
            None => tables.push(TableStats {
                name: info.name.clone(),
                rows: info.row_count,
                ..TableStats::default()
            }),
        }
    }

    if decode_rows {
        for part in batch.parts() {
            for changes in part?.tables {
                let Some(stats) = tables.iter_mut().find(|t| t.name == changes.table) else {
                    continue;
                };
                for row in &changes.rows {
                    *stats.states.entry(state_name(row.state)).or_insert(0) += 1;
                }
            }
        }
    }

    let parts = show_parts.then(|| {
        manifest
            .parts
            .iter()
            .map(|p| PartStats {
                index: p.index,
                file_name: p.file_name.clone(),
                rows: p.row_count,
                size: p.size,
                is_last: p.is_last,
            })
            .collect()
    });

    Ok(InspectResult {
        path: dir.display().to_string(),
        session_id: manifest.session_id.to_string(),
        codec: manifest.codec.name().to_string(),
        created_at: manifest.created_at.to_rfc3339(),
        part_count: manifest.parts.len(),
        row_count: manifest.row_count,
        total_size: manifest.parts.iter().map(|p| p.size).sum(),
        tables,
        parts,
    })
}

fn state_name(state: RowState) -> &'static str {
    match state {
        RowState::Inserted => "inserted",
        RowState::Updated => "updated",
        RowState::Deleted => "deleted",
        RowState::Unchanged => "unchanged",
    }
}

fn print_text_output(result: &InspectResult) {
    println!("ScopeSync Batch Inspection");
    println!("==========================");
    println!();
    println!("Path:    {}", result.path);
    println!("Session: {}", result.session_id);
    println!("Codec:   {}", result.codec);
    println!("Created: {}", result.created_at);
    println!();
    println!("Contents:");
    println!("  Parts: {}", result.part_count);
    println!("  Rows:  {}", result.row_count);
    println!("  Size:  {}", format_size(result.total_size));

    if !result.tables.is_empty() {
        println!();
        println!("Tables:");
        for table in &result.tables {
            let states: Vec<String> =
                table.states.iter().map(|(s, n)| format!("{s} {n}")).collect();
            if states.is_empty() {
                println!("  {}: {} rows", table.name, table.rows);
            } else {
                println!("  {}: {} rows ({})", table.name, table.rows, states.join(", "));
            }
        }
    }

    if let Some(parts) = &result.parts {
        println!();
        println!("Parts:");
        for part in parts {
            println!(
                "  [{}] {} rows, {}{}",
                part.index,
                part.rows,
                format_size(part.size),
                if part.is_last { " (last)" } else { "" }
            );
        }
    }
    println!();
}

fn format_size(bytes: usize) -> String {
    if bytes < 1024 {
        format!("{} bytes", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
