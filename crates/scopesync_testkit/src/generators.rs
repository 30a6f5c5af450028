//! Property-based test generators using proptest.
//!
//! Scope identities are drawn from a small pool so that generated metadata
//! regularly names the requesting scope.

use proptest::prelude::*;
use scopesync_codec::Value;
use scopesync_protocol::{Row, RowState, ScopeInfo, SyncRow, TrackingMetadata};
use uuid::Uuid;

/// First pooled scope identity.
pub const SCOPE_A: Uuid = Uuid::from_u128(0xA);
/// Second pooled scope identity.
pub const SCOPE_B: Uuid = Uuid::from_u128(0xB);

/// Strategy for scope identities, biased towards [`SCOPE_A`] and [`SCOPE_B`].
pub fn scope_id_strategy() -> impl Strategy<Value = Uuid> {
    prop_oneof![
        2 => Just(SCOPE_A),
        2 => Just(SCOPE_B),
        1 => any::<u128>().prop_map(Uuid::from_u128),
    ]
}

/// Strategy for store timestamps around a handful of interesting values.
pub fn timestamp_strategy() -> impl Strategy<Value = i64> {
    prop_oneof![
        1 => Just(0i64),
        4 => 0i64..300,
        1 => Just(i64::MAX - 1),
    ]
}

/// Strategy for arbitrary tracking metadata.
///
/// The update timestamp never precedes the creation timestamp.
pub fn tracking_metadata_strategy() -> impl Strategy<Value = TrackingMetadata> {
    (
        prop::option::of(scope_id_strategy()),
        prop::option::of(scope_id_strategy()),
        timestamp_strategy(),
        0i64..200,
        any::<bool>(),
    )
        .prop_map(|(create, update, created_at, delta, tombstone)| TrackingMetadata {
            create_scope_id: create,
            update_scope_id: update,
            create_timestamp: created_at,
            update_timestamp: created_at.saturating_add(delta),
            is_tombstone: tombstone,
        })
}

/// Strategy for a requesting scope.
pub fn scope_strategy() -> impl Strategy<Value = ScopeInfo> {
    (scope_id_strategy(), timestamp_strategy(), any::<bool>())
        .prop_map(|(id, last, is_new)| ScopeInfo::requesting(id, "default", last, is_new))
}

/// Strategy for scalar values.
pub fn value_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::Integer),
        (-1.0e9f64..1.0e9).prop_map(Value::Float),
        "[a-z ]{0,24}".prop_map(Value::Text),
        prop::collection::vec(any::<u8>(), 0..32).prop_map(Value::Bytes),
    ]
}

/// Strategy for `item(id, name, qty)` rows with the given id.
pub fn item_row_strategy(id: i64) -> impl Strategy<Value = Row> {
    ("[a-z]{1,16}", any::<i32>())
        .prop_map(move |(name, qty)| Row::new().with("id", id).with("name", name).with("qty", qty))
}

/// Strategy for selected row states.
pub fn selected_state_strategy() -> impl Strategy<Value = RowState> {
    prop_oneof![
        Just(RowState::Inserted),
        Just(RowState::Updated),
        Just(RowState::Deleted),
    ]
}

/// Strategy for `count` classified item rows with distinct ids.
pub fn item_changes_strategy(count: std::ops::Range<usize>) -> impl Strategy<Value = Vec<SyncRow>> {
    prop::collection::vec((selected_state_strategy(), "[a-z]{0,64}", any::<i32>()), count).prop_map(
        |specs| {
            specs
                .into_iter()
                .enumerate()
                .map(|(i, (state, name, qty))| {
                    let id = i as i64;
                    let row = if state == RowState::Deleted {
                        Row::new().with("id", id)
                    } else {
                        Row::new().with("id", id).with("name", name).with("qty", qty)
                    };
                    SyncRow::new(state, row)
                })
                .collect()
        },
    )
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #![proptest_config(PropTestConfig::quick().to_proptest_config())]

        #[test]
        fn metadata_is_ordered(meta in tracking_metadata_strategy()) {
            prop_assert!(meta.update_timestamp >= meta.create_timestamp);
        }

        #[test]
        fn changes_have_distinct_ids(rows in item_changes_strategy(0..40)) {
            let mut ids: Vec<_> = rows.iter().map(|r| r.row.get("id").cloned()).collect();
            let len = ids.len();
            ids.dedup();
            prop_assert_eq!(ids.len(), len);
        }

        #[test]
        fn deletes_carry_only_keys(rows in item_changes_strategy(1..20)) {
            for row in rows.iter().filter(|r| r.state == RowState::Deleted) {
                prop_assert_eq!(row.row.len(), 1);
            }
        }
    }
}
