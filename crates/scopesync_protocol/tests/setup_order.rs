//! Property tests for dependency ordering of a sync setup.

use proptest::prelude::*;
use scopesync_protocol::{ColumnSchema, ColumnType, SyncSetup, TableSchema};

/// Builds `n` tables where table `i` may reference any table `j < i`,
/// then shuffles declaration order with `rotation`.
fn acyclic_tables(n: usize, edges: &[(usize, usize)], rotation: usize) -> Vec<TableSchema> {
    let mut tables: Vec<TableSchema> = (0..n)
        .map(|i| {
            let mut table = TableSchema::new(format!("t{i}"))
                .column(ColumnSchema::new("id", ColumnType::Integer).not_null())
                .column(ColumnSchema::new("ref", ColumnType::Integer))
                .primary_key(&["id"]);
            for (k, (child, parent)) in edges.iter().enumerate() {
                if *child == i && parent < child {
                    let parent_table = format!("t{parent}");
                    table = table.foreign_key(format!("fk{k}"), &["ref"], parent_table, &["id"]);
                }
            }
            table
        })
        .collect();
    if n > 0 {
        tables.rotate_left(rotation % n);
    }
    tables
}

proptest! {
    #[test]
    fn parents_always_precede_children(
        n in 1usize..8,
        edges in prop::collection::vec((0usize..8, 0usize..8), 0..16),
        rotation in 0usize..8,
    ) {
        let tables = acyclic_tables(n, &edges, rotation);
        let setup = SyncSetup::new(tables).unwrap();
        prop_assert_eq!(setup.tables().len(), n);

        let position = |name: &str| setup.tables().iter().position(|t| t.name() == name).unwrap();
        for table in setup.tables() {
            for fk in table.foreign_keys() {
                prop_assert!(position(&fk.parent_table) < position(table.name()));
            }
        }
    }
}
