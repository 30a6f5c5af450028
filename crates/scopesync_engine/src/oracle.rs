//! Row classification.

use scopesync_protocol::{RowState, ScopeInfo, SyncDirection, TrackingMetadata};

/// Decides what a tracked row means to a requesting scope.
///
/// Classification is a pure function of the row's tracking metadata and the
/// requesting scope. The order of the checks matters: testing for an update
/// before testing for an insert keeps rows created after a reinitialization
/// from being reported as inserts of rows the peer already holds.
#[derive(Debug, Clone, Copy)]
pub struct RowVersionOracle<'a> {
    scope: &'a ScopeInfo,
    direction: SyncDirection,
}

impl<'a> RowVersionOracle<'a> {
    /// Creates an oracle for one pass.
    pub fn new(scope: &'a ScopeInfo, direction: SyncDirection) -> Self {
        Self { scope, direction }
    }

    /// Direction of the pass.
    pub fn direction(&self) -> SyncDirection {
        self.direction
    }

    /// Classifies one row.
    pub fn classify(&self, meta: &TrackingMetadata) -> RowState {
        classify(meta, self.scope)
    }
}

/// Classifies `meta` relative to `scope`.
pub fn classify(meta: &TrackingMetadata, scope: &ScopeInfo) -> RowState {
    if meta.is_tombstone {
        return RowState::Deleted;
    }

    let last = scope.last_sync_timestamp;
    let locally_created = meta.create_scope_id.is_none();
    let locally_updated = meta.update_scope_id != Some(scope.id);

    if !scope.is_new
        && locally_updated
        && meta.update_timestamp > last
        && (meta.create_timestamp <= last || !locally_created)
    {
        return RowState::Updated;
    }

    if scope.is_new || (locally_created && meta.create_timestamp >= last) {
        return RowState::Inserted;
    }

    if locally_updated && meta.update_scope_id.is_some() {
        return RowState::Updated;
    }

    RowState::Unchanged
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn scope(last: i64, is_new: bool) -> ScopeInfo {
        ScopeInfo::requesting(Uuid::from_u128(0xA), "s", last, is_new)
    }

    fn meta(
        create_scope: Option<Uuid>,
        update_scope: Option<Uuid>,
        create_ts: i64,
        update_ts: i64,
    ) -> TrackingMetadata {
        TrackingMetadata {
            create_scope_id: create_scope,
            update_scope_id: update_scope,
            create_timestamp: create_ts,
            update_timestamp: update_ts,
            is_tombstone: false,
        }
    }

    #[test]
    fn tombstones_are_deleted() {
        let mut m = meta(None, None, 1, 2);
        m.is_tombstone = true;
        assert_eq!(classify(&m, &scope(100, false)), RowState::Deleted);
        assert_eq!(classify(&m, &scope(0, true)), RowState::Deleted);
    }

    #[test]
    fn row_updated_by_another_scope_after_last_sync() {
        let b = Uuid::from_u128(0xB);
        let m = meta(None, Some(b), 50, 150);
        assert_eq!(classify(&m, &scope(100, false)), RowState::Updated);
    }

    #[test]
    fn local_insert_after_last_sync() {
        let m = meta(None, None, 120, 120);
        assert_eq!(classify(&m, &scope(100, false)), RowState::Inserted);
    }

    #[test]
    fn row_written_by_requester_is_not_echoed() {
        let a = Uuid::from_u128(0xA);
        let m = meta(Some(a), Some(a), 120, 130);
        assert_eq!(classify(&m, &scope(100, false)), RowState::Unchanged);
    }

    #[test]
    fn old_local_row_is_unchanged() {
        let m = meta(None, None, 10, 20);
        assert_eq!(classify(&m, &scope(100, false)), RowState::Unchanged);
    }

    #[test]
    fn new_scope_receives_everything() {
        let a = Uuid::from_u128(0xA);
        for m in [meta(None, None, 1, 1), meta(Some(a), Some(a), 5, 9)] {
            assert_eq!(classify(&m, &scope(1_000, true)), RowState::Inserted);
        }
    }

    #[test]
    fn foreign_row_updated_before_last_sync_is_still_updated() {
        // Another scope's update is forwarded even when it is older than
        // the requester's watermark.
        let c = Uuid::from_u128(0xC);
        let m = meta(Some(c), Some(c), 10, 20);
        assert_eq!(classify(&m, &scope(100, false)), RowState::Updated);
    }

    #[test]
    fn oracle_delegates() {
        let s = scope(100, false);
        let oracle = RowVersionOracle::new(&s, SyncDirection::Upload);
        assert_eq!(oracle.direction(), SyncDirection::Upload);
        assert_eq!(oracle.classify(&meta(None, None, 120, 120)), RowState::Inserted);
    }
}
