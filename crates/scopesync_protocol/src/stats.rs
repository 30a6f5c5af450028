//! Session statistics.
//!
//! Counters are plain values owned by one session; orchestration and reporting
//! layers read them from the session summary.

use crate::row::RowState;
use serde::{Deserialize, Serialize};

/// Rows selected from one table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableChangesSelected {
    /// Table name.
    pub table: String,
    /// Rows classified `Inserted`.
    pub inserts: usize,
    /// Rows classified `Updated`.
    pub updates: usize,
    /// Rows classified `Deleted`.
    pub deletes: usize,
}

impl TableChangesSelected {
    /// Empty counters for `table`.
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            ..Self::default()
        }
    }

    /// Counts one selected row.
    pub fn record(&mut self, state: RowState) {
        match state {
            RowState::Inserted => self.inserts += 1,
            RowState::Updated => self.updates += 1,
            RowState::Deleted => self.deletes += 1,
            RowState::Unchanged => {}
        }
    }

    /// Total selected rows.
    pub fn total(&self) -> usize {
        self.inserts + self.updates + self.deletes
    }
}

/// Rows selected across all tables of one pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseChangesSelected {
    /// Per-table counters, in enumeration order.
    pub tables: Vec<TableChangesSelected>,
}

impl DatabaseChangesSelected {
    /// Adds a table's counters; tables with nothing selected are dropped.
    pub fn push(&mut self, table: TableChangesSelected) {
        if table.total() > 0 {
            self.tables.push(table);
        }
    }

    /// Counters for one table.
    pub fn table(&self, name: &str) -> Option<&TableChangesSelected> {
        self.tables.iter().find(|t| t.table == name)
    }

    /// Total inserts.
    pub fn total_inserts(&self) -> usize {
        self.tables.iter().map(|t| t.inserts).sum()
    }

    /// Total updates.
    pub fn total_updates(&self) -> usize {
        self.tables.iter().map(|t| t.updates).sum()
    }

    /// Total deletes.
    pub fn total_deletes(&self) -> usize {
        self.tables.iter().map(|t| t.deletes).sum()
    }

    /// Total selected rows.
    pub fn total(&self) -> usize {
        self.tables.iter().map(TableChangesSelected::total).sum()
    }
}

/// Outcome counters for one table and one apply phase.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableChangesApplied {
    /// Table name.
    pub table: String,
    /// Inserted rows, forced inserts included.
    pub inserts: usize,
    /// Updated rows, forced and merged updates included.
    pub updates: usize,
    /// Deleted rows, forced deletes included.
    pub deletes: usize,
    /// Conflicts resolved without a write.
    pub resolved_conflicts: usize,
    /// Rows that could not be applied.
    pub failed: usize,
}

impl TableChangesApplied {
    /// Empty counters for `table`.
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            ..Self::default()
        }
    }

    /// Counts one written row.
    pub fn record_applied(&mut self, state: RowState) {
        match state {
            RowState::Inserted => self.inserts += 1,
            RowState::Updated => self.updates += 1,
            RowState::Deleted => self.deletes += 1,
            RowState::Unchanged => {}
        }
    }

    /// Applied rows.
    pub fn total(&self) -> usize {
        self.inserts + self.updates + self.deletes
    }

    /// Rows that reached a terminal outcome.
    pub fn processed(&self) -> usize {
        self.total() + self.resolved_conflicts + self.failed
    }

    /// Adds `other`'s counters to these.
    pub fn absorb(&mut self, other: &TableChangesApplied) {
        self.inserts += other.inserts;
        self.updates += other.updates;
        self.deletes += other.deletes;
        self.resolved_conflicts += other.resolved_conflicts;
        self.failed += other.failed;
    }
}

/// Outcome counters across all tables of one pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseChangesApplied {
    /// Per-table counters, in first-touched order.
    pub tables: Vec<TableChangesApplied>,
}

impl DatabaseChangesApplied {
    /// Merges a table's counters into the entry of the same name.
    pub fn merge(&mut self, table: TableChangesApplied) {
        if table.processed() == 0 {
            return;
        }
        match self.tables.iter_mut().find(|t| t.table == table.table) {
            Some(existing) => existing.absorb(&table),
            None => self.tables.push(table),
        }
    }

    /// Counters for one table.
    pub fn table(&self, name: &str) -> Option<&TableChangesApplied> {
        self.tables.iter().find(|t| t.table == name)
    }

    /// Total applied rows.
    pub fn total_applied(&self) -> usize {
        self.tables.iter().map(TableChangesApplied::total).sum()
    }

    /// Total conflicts resolved without a write.
    pub fn total_resolved_conflicts(&self) -> usize {
        self.tables.iter().map(|t| t.resolved_conflicts).sum()
    }

    /// Total failed rows.
    pub fn total_failed(&self) -> usize {
        self.tables.iter().map(|t| t.failed).sum()
    }
}
