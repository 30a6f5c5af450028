//! Batch accumulation and spooled batch access.
//!
//! With a zero budget the whole changeset stays in one resident part. With a
//! positive budget every part is written to `<root>/<session dir>/` as soon as
//! it is sealed, alongside a `manifest.json` that lists the parts in order.

use crate::error::{SyncError, SyncResult};
use chrono::Utc;
use scopesync_codec::{CodecKind, FromValue, ToValue};
use scopesync_protocol::{BatchManifest, BatchPart, SyncRow, MANIFEST_FILE_NAME};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use uuid::Uuid;

const MANIFEST_TEMP: &str = "manifest.json.tmp";

/// Collects classified rows into numbered parts within a byte budget.
///
/// Parts are numbered `0..N-1` without gaps and exactly one, the final one,
/// is flagged last. A sealed part is written out one seal later, so the part
/// that turns out to be final can still be flagged before it hits the disk.
#[derive(Debug)]
pub struct BatchAccumulator {
    budget: usize,
    codec: CodecKind,
    directory: Option<PathBuf>,
    manifest: BatchManifest,
    current: BatchPart,
    pending: Option<BatchPart>,
}

impl BatchAccumulator {
    /// Resident accumulator: one part, no spooling.
    pub fn unbounded(session_id: Uuid, codec: CodecKind) -> Self {
        Self {
            budget: 0,
            codec,
            directory: None,
            manifest: BatchManifest::new(session_id, codec),
            current: BatchPart::new(0),
            pending: None,
        }
    }

    /// Spooling accumulator writing under a fresh directory inside `root`.
    ///
    /// A `budget` of 0 falls back to [`BatchAccumulator::unbounded`].
    pub fn spooled(session_id: Uuid, codec: CodecKind, budget: usize, root: &Path) -> Self {
        let mut acc = Self::unbounded(session_id, codec);
        if budget > 0 {
            acc.budget = budget;
            acc.directory = Some(root.join(session_directory_name(session_id)));
        }
        acc
    }

    /// Spool directory, if spooling.
    pub fn directory(&self) -> Option<&Path> {
        self.directory.as_deref()
    }

    /// Adds one row. Returns the descriptor of a part written out as a result.
    pub fn add(
        &mut self,
        table: &str,
        row: SyncRow,
    ) -> SyncResult<Option<scopesync_protocol::BatchPartInfo>> {
        let size = row.approximate_size();
        let mut written = None;
        if self.budget > 0 {
            if size > self.budget {
                return Err(SyncError::RowOverSized {
                    table: table.to_string(),
                    size,
                    budget: self.budget,
                });
            }
            if !self.current.is_empty() && self.current.size + size > self.budget {
                written = self.seal()?;
            }
        }
        self.current.push(table, row);
        Ok(written)
    }

    /// Adds several rows of one table.
    pub fn add_rows(
        &mut self,
        table: &str,
        rows: impl IntoIterator<Item = SyncRow>,
    ) -> SyncResult<Vec<scopesync_protocol::BatchPartInfo>> {
        let mut written = Vec::new();
        for row in rows {
            written.extend(self.add(table, row)?);
        }
        Ok(written)
    }

    /// Drops the accumulator and removes anything it spooled.
    pub fn discard(self) -> SyncResult<()> {
        if let Some(dir) = self.directory.as_ref().filter(|d| d.exists()) {
            fs::remove_dir_all(dir)?;
        }
        Ok(())
    }

    fn seal(&mut self) -> SyncResult<Option<scopesync_protocol::BatchPartInfo>> {
        let next = BatchPart::new(self.current.index + 1);
        let sealed = std::mem::replace(&mut self.current, next);
        tracing::debug!(
            index = sealed.index,
            rows = sealed.row_count(),
            size = sealed.size,
            "sealed batch part"
        );
        match self.pending.replace(sealed) {
            Some(previous) => self.write_part(previous).map(Some),
            None => Ok(None),
        }
    }

    fn write_part(&mut self, part: BatchPart) -> SyncResult<scopesync_protocol::BatchPartInfo> {
        let Some(dir) = self.directory.as_ref() else {
            return Err(SyncError::invalid_batch("resident batch cannot be spooled"));
        };
        fs::create_dir_all(dir)?;
        let file_name = part_file_name(part.index, self.codec);
        let bytes = self.codec.codec().encode(&part.to_value())?;
        fs::write(dir.join(&file_name), bytes)?;
        let info = part.info(Some(file_name));
        self.manifest.push(info.clone());
        Ok(info)
    }

    /// Seals the remainder as the final part and returns the batch.
    ///
    /// An empty changeset yields a single empty resident part 0.
    pub fn finalize(mut self) -> SyncResult<BatchInfo> {
        if self.directory.is_none() {
            self.current.is_last = true;
            self.manifest.push(self.current.info(None));
            return Ok(BatchInfo::resident(self.manifest, self.current));
        }

        let last = match self.pending.take() {
            Some(pending) if self.current.is_empty() => pending,
            Some(pending) => {
                self.write_part(pending)?;
                std::mem::replace(&mut self.current, BatchPart::new(0))
            }
            None if self.current.is_empty() => {
                let mut part = std::mem::replace(&mut self.current, BatchPart::new(0));
                part.is_last = true;
                self.manifest.push(part.info(None));
                return Ok(BatchInfo::resident(self.manifest, part));
            }
            None => std::mem::replace(&mut self.current, BatchPart::new(0)),
        };

        let mut last = last;
        last.is_last = true;
        self.write_part(last)?;

        let dir = self
            .directory
            .take()
            .ok_or_else(|| SyncError::invalid_batch("missing spool directory"))?;
        save_manifest(&dir, &self.manifest)?;
        tracing::debug!(
            dir = %dir.display(),
            parts = self.manifest.parts.len(),
            rows = self.manifest.row_count,
            "spooled batch"
        );
        Ok(BatchInfo {
            manifest: self.manifest,
            location: Location::Spooled(dir),
        })
    }
}

fn session_directory_name(session_id: Uuid) -> String {
    format!("{}_{}", Utc::now().format("%Y%m%d_%H%M%S"), session_id.simple())
}

fn part_file_name(index: u32, codec: CodecKind) -> String {
    format!("part_{index:05}.{}", codec.extension())
}

fn save_manifest(dir: &Path, manifest: &BatchManifest) -> SyncResult<()> {
    let data = serde_json::to_vec_pretty(manifest)
        .map_err(|e| SyncError::invalid_batch(format!("manifest encoding failed: {e}")))?;
    let temp_path = dir.join(MANIFEST_TEMP);
    let mut file = File::create(&temp_path)?;
    file.write_all(&data)?;
    file.sync_all()?;
    drop(file);
    fs::rename(&temp_path, dir.join(MANIFEST_FILE_NAME))?;
    Ok(())
}

#[derive(Debug)]
enum Location {
    Resident(Box<BatchPart>),
    Spooled(PathBuf),
}

/// A finalized changeset, resident or spooled.
#[derive(Debug)]
pub struct BatchInfo {
    manifest: BatchManifest,
    location: Location,
}

impl BatchInfo {
    fn resident(manifest: BatchManifest, part: BatchPart) -> Self {
        Self {
            manifest,
            location: Location::Resident(Box::new(part)),
        }
    }

    /// Opens a spooled batch directory and validates its manifest.
    pub fn load(dir: impl AsRef<Path>) -> SyncResult<Self> {
        let dir = dir.as_ref();
        let data = fs::read(dir.join(MANIFEST_FILE_NAME))?;
        let manifest: BatchManifest = serde_json::from_slice(&data)
            .map_err(|e| SyncError::invalid_batch(format!("manifest decoding failed: {e}")))?;
        manifest.validate()?;
        Ok(Self {
            manifest,
            location: Location::Spooled(dir.to_path_buf()),
        })
    }

    /// The manifest.
    pub fn manifest(&self) -> &BatchManifest {
        &self.manifest
    }

    /// Total rows.
    pub fn row_count(&self) -> usize {
        self.manifest.row_count
    }

    /// Spool directory, `None` when resident.
    pub fn directory(&self) -> Option<&Path> {
        match &self.location {
            Location::Spooled(dir) => Some(dir),
            Location::Resident(_) => None,
        }
    }

    /// Returns true if parts live on disk.
    pub fn is_spooled(&self) -> bool {
        self.directory().is_some()
    }

    /// Iterates parts in index order, reading spooled parts one at a time.
    pub fn parts(&self) -> BatchParts<'_> {
        BatchParts {
            batch: self,
            position: 0,
        }
    }

    /// Checks the manifest and that every part file matches its entry.
    pub fn validate(&self) -> SyncResult<()> {
        self.manifest.validate()?;
        let mut rows = 0;
        for part in self.parts() {
            rows += part?.row_count();
        }
        if rows != self.manifest.row_count {
            return Err(SyncError::invalid_batch(format!(
                "parts hold {rows} rows, manifest lists {}",
                self.manifest.row_count
            )));
        }
        Ok(())
    }

    /// Deletes the spool directory. A resident batch is just dropped.
    pub fn cleanup(self) -> SyncResult<()> {
        if let Location::Spooled(dir) = &self.location {
            if dir.exists() {
                fs::remove_dir_all(dir)?;
                tracing::debug!(dir = %dir.display(), "removed batch directory");
            }
        }
        Ok(())
    }

    /// Reads the part at `position` and checks it against its manifest entry.
    pub fn part(&self, position: usize) -> SyncResult<BatchPart> {
        let info = self
            .manifest
            .parts
            .get(position)
            .ok_or_else(|| SyncError::invalid_batch(format!("no part at position {position}")))?;
        let part = match &self.location {
            Location::Resident(part) => part.as_ref().clone(),
            Location::Spooled(dir) => {
                let file_name = info.file_name.as_deref().ok_or_else(|| {
                    SyncError::invalid_batch(format!("part {} has no file", info.index))
                })?;
                let bytes = fs::read(dir.join(file_name))?;
                BatchPart::from_value(&self.manifest.codec.codec().decode(&bytes)?)?
            }
        };
        if part.index != info.index
            || part.is_last != info.is_last
            || part.row_count() != info.row_count
        {
            return Err(SyncError::invalid_batch(format!(
                "part {} does not match its manifest entry",
                info.index
            )));
        }
        Ok(part)
    }
}

/// Iterator over the parts of a [`BatchInfo`].
#[derive(Debug)]
pub struct BatchParts<'a> {
    batch: &'a BatchInfo,
    position: usize,
}

impl Iterator for BatchParts<'_> {
    type Item = SyncResult<BatchPart>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.position >= self.batch.manifest.parts.len() {
            return None;
        }
        let part = self.batch.part(self.position);
        self.position += 1;
        Some(part)
    }
}
