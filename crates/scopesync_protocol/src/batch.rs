//! Batch parts and the spool manifest.

use crate::error::ManifestError;
use crate::row::SyncRow;
use chrono::{DateTime, Utc};
use scopesync_codec::{
    required_field, required_integer, required_text, CodecError, CodecKind, CodecResult,
    FromValue, ToValue, Value,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Current manifest format version.
pub const BATCH_MANIFEST_VERSION: u32 = 1;

/// File name of the manifest inside a session directory.
pub const MANIFEST_FILE_NAME: &str = "manifest.json";

/// Classified rows of one table within a part.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableChanges {
    /// Table name.
    pub table: String,
    /// Rows in selection order.
    pub rows: Vec<SyncRow>,
}

impl TableChanges {
    /// Creates an empty set for `table`.
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            rows: Vec::new(),
        }
    }
}

impl ToValue for TableChanges {
    fn to_value(&self) -> Value {
        Value::text_map(vec![
            ("table", Value::Text(self.table.clone())),
            (
                "rows",
                Value::Array(self.rows.iter().map(ToValue::to_value).collect()),
            ),
        ])
    }
}

impl FromValue for TableChanges {
    fn from_value(value: &Value) -> CodecResult<Self> {
        let table = required_text(value, "table")?.to_string();
        let rows = required_field(value, "rows")?
            .as_array()
            .ok_or_else(|| CodecError::invalid_structure("field `rows` must be an array"))?
            .iter()
            .map(SyncRow::from_value)
            .collect::<CodecResult<_>>()?;
        Ok(Self { table, rows })
    }
}

/// One numbered chunk of a session's changeset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchPart {
    /// Position in the session, starting at 0.
    pub index: u32,
    /// True for the final part.
    pub is_last: bool,
    /// Per-table rows, in selection order.
    pub tables: Vec<TableChanges>,
    /// Approximate footprint of the rows in bytes.
    pub size: usize,
}

impl BatchPart {
    /// Creates an empty part.
    pub fn new(index: u32) -> Self {
        Self {
            index,
            is_last: false,
            tables: Vec::new(),
            size: 0,
        }
    }

    /// Appends a row, extending the trailing table entry when it matches.
    pub fn push(&mut self, table: &str, row: SyncRow) {
        self.size += row.approximate_size();
        match self.tables.last_mut() {
            Some(last) if last.table == table => last.rows.push(row),
            _ => {
                let mut changes = TableChanges::new(table);
                changes.rows.push(row);
                self.tables.push(changes);
            }
        }
    }

    /// Total rows across tables.
    pub fn row_count(&self) -> usize {
        self.tables.iter().map(|t| t.rows.len()).sum()
    }

    /// Returns true if the part holds no rows.
    pub fn is_empty(&self) -> bool {
        self.tables.iter().all(|t| t.rows.is_empty())
    }

    /// Manifest entry for this part.
    pub fn info(&self, file_name: Option<String>) -> BatchPartInfo {
        BatchPartInfo {
            index: self.index,
            file_name,
            is_last: self.is_last,
            row_count: self.row_count(),
            size: self.size,
            tables: self
                .tables
                .iter()
                .map(|t| BatchPartTableInfo {
                    name: t.table.clone(),
                    row_count: t.rows.len(),
                })
                .collect(),
        }
    }
}

impl ToValue for BatchPart {
    fn to_value(&self) -> Value {
        Value::text_map(vec![
            ("index", Value::Integer(i64::from(self.index))),
            ("is_last", Value::Bool(self.is_last)),
            ("size", Value::Integer(self.size as i64)),
            (
                "tables",
                Value::Array(self.tables.iter().map(ToValue::to_value).collect()),
            ),
        ])
    }
}

impl FromValue for BatchPart {
    fn from_value(value: &Value) -> CodecResult<Self> {
        let index = u32::try_from(required_integer(value, "index")?)
            .map_err(|_| CodecError::invalid_structure("part index out of range"))?;
        let is_last = required_field(value, "is_last")?
            .as_bool()
            .ok_or_else(|| CodecError::invalid_structure("field `is_last` must be a bool"))?;
        let size = usize::try_from(required_integer(value, "size")?)
            .map_err(|_| CodecError::invalid_structure("part size out of range"))?;
        let tables = required_field(value, "tables")?
            .as_array()
            .ok_or_else(|| CodecError::invalid_structure("field `tables` must be an array"))?
            .iter()
            .map(TableChanges::from_value)
            .collect::<CodecResult<_>>()?;
        Ok(Self {
            index,
            is_last,
            tables,
            size,
        })
    }
}

/// Row count of one table within a part.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchPartTableInfo {
    /// Table name.
    pub name: String,
    /// Rows of that table in the part.
    pub row_count: usize,
}

/// Manifest entry describing one part.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchPartInfo {
    /// Part index.
    pub index: u32,
    /// Spool file name, `None` for a resident part.
    pub file_name: Option<String>,
    /// True for the final part.
    pub is_last: bool,
    /// Rows in the part.
    pub row_count: usize,
    /// Approximate footprint in bytes.
    pub size: usize,
    /// Per-table counts.
    pub tables: Vec<BatchPartTableInfo>,
}

/// Ordered description of every part of one session's changeset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchManifest {
    /// Format version.
    pub version: u32,
    /// Session the batch belongs to.
    pub session_id: Uuid,
    /// Codec of the part files.
    pub codec: CodecKind,
    /// When the batch was finalized.
    pub created_at: DateTime<Utc>,
    /// Parts in index order.
    pub parts: Vec<BatchPartInfo>,
    /// Total rows across parts.
    pub row_count: usize,
}

impl BatchManifest {
    /// Starts an empty manifest.
    pub fn new(session_id: Uuid, codec: CodecKind) -> Self {
        Self {
            version: BATCH_MANIFEST_VERSION,
            session_id,
            codec,
            created_at: Utc::now(),
            parts: Vec::new(),
            row_count: 0,
        }
    }

    /// Appends a part entry.
    pub fn push(&mut self, info: BatchPartInfo) {
        self.row_count += info.row_count;
        self.parts.push(info);
    }

    /// Checks numbering, the terminal flag and the row total.
    pub fn validate(&self) -> Result<(), ManifestError> {
        if self.version != BATCH_MANIFEST_VERSION {
            return Err(ManifestError::UnsupportedVersion {
                version: self.version,
            });
        }
        if self.parts.is_empty() {
            return Err(ManifestError::Empty);
        }

        let final_index = self.parts.len() - 1;
        for (position, part) in self.parts.iter().enumerate() {
            let expected = position as u32;
            if part.index != expected {
                return Err(ManifestError::IndexGap {
                    expected,
                    found: part.index,
                });
            }
            if part.is_last && position != final_index {
                return Err(ManifestError::MisplacedLast { index: part.index });
            }
        }
        if !self.parts[final_index].is_last {
            return Err(ManifestError::MissingLast);
        }

        let actual: usize = self.parts.iter().map(|p| p.row_count).sum();
        if actual != self.row_count {
            return Err(ManifestError::RowCountMismatch {
                expected: self.row_count,
                actual,
            });
        }
        Ok(())
    }
}
