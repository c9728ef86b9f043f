//! Point-in-time visibility snapshots.

use std::fmt;

use smallvec::SmallVec;
use tessera_types::Timestamp;

/// Inline capacity of the sparse committed list.
///
/// The list only holds timestamps at or above the clean-time watermark,
/// which stays short in steady state, so it usually fits without a heap
/// allocation and the whole snapshot sits on one or two cache lines.
const COMMITTED_INLINE: usize = 8;

/// A snapshot of MVCC state, deciding whether an op timestamp is visible.
///
/// Summary rule: a timestamp `T` is committed if and only if
/// `T < all_committed_before`, or `committed_timestamps` contains `T`.
///
/// In ASCII form, where `C` is a committed op and `U` an uncommitted one:
///
/// ```text
///   CCCCCCCCCCCCCCCCCUUUUUCUUUCU
///                    |    \___\___ committed_timestamps
///                    |
///                    \- all_committed_before
/// ```
///
/// Snapshots are plain values: once taken, they are unaffected by later
/// registry mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MvccSnapshot {
    /// Watermark below which every timestamp is committed.
    pub(crate) all_committed_before: Timestamp,

    /// Watermark at or above which no timestamp is committed. Equivalent to
    /// `max(committed_timestamps) + 1`, cached because the list is
    /// unsorted.
    pub(crate) none_committed_at_or_after: Timestamp,

    /// Committed timestamps at or above `all_committed_before`. A set would
    /// look natural here, but the list stays small and is rarely consulted
    /// (the watermarks answer almost every query), so the compact vector
    /// wins.
    pub(crate) committed_timestamps: SmallVec<[Timestamp; COMMITTED_INLINE]>,
}

impl MvccSnapshot {
    /// A snapshot that commits no mintable timestamp, with both watermarks
    /// at the initial clean time.
    #[must_use]
    pub fn new() -> Self {
        Self {
            all_committed_before: Timestamp::INITIAL,
            none_committed_at_or_after: Timestamp::INITIAL,
            committed_timestamps: SmallVec::new(),
        }
    }

    /// A snapshot that considers every op committed. Mostly useful in
    /// tests and for readers that must see all history.
    #[must_use]
    pub fn all_ops() -> Self {
        Self::from(Timestamp::MAX)
    }

    /// A snapshot that considers no op committed.
    #[must_use]
    pub fn no_ops() -> Self {
        Self::from(Timestamp::MIN)
    }

    /// Whether `timestamp` is committed in this snapshot.
    #[inline]
    #[must_use]
    pub fn is_committed(&self, timestamp: Timestamp) -> bool {
        // The watermarks answer the common cases without touching the list.
        if timestamp < self.all_committed_before {
            return true;
        }
        if timestamp >= self.none_committed_at_or_after {
            return false;
        }
        self.committed_contains(timestamp)
    }

    /// Whether this snapshot may contain committed ops with a timestamp at
    /// or above `timestamp`. A false answer lets scanners skip redo history
    /// entirely.
    #[must_use]
    pub fn may_have_committed_ops_at_or_after(&self, timestamp: Timestamp) -> bool {
        timestamp < self.none_committed_at_or_after
    }

    /// Whether this snapshot may contain uncommitted ops with a timestamp
    /// at or below `timestamp`. A false answer lets scanners skip undo
    /// history entirely.
    #[must_use]
    pub fn may_have_uncommitted_ops_at_or_before(&self, timestamp: Timestamp) -> bool {
        // Uncommitted ops can hide at or below `timestamp` if the floor is
        // below it, or if the floor sits exactly on a timestamp that never
        // made it into the committed list. The latter happens when the last
        // in-flight op commits at the floor itself: there is nothing left
        // to advance the floor past it.
        timestamp > self.all_committed_before
            || (timestamp == self.all_committed_before && !self.committed_contains(timestamp))
    }

    /// Whether this snapshot is determined by its floor alone: everything
    /// below `all_committed_before` committed, everything else not.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.committed_timestamps.is_empty()
    }

    /// Consider `timestamp` committed. No-op if it already is.
    pub fn add_committed(&mut self, timestamp: Timestamp) {
        if self.is_committed(timestamp) {
            return;
        }
        self.committed_timestamps.push(timestamp);
        if self.none_committed_at_or_after <= timestamp {
            self.none_committed_at_or_after = Timestamp::new(timestamp.value() + 1);
        }
    }

    /// Consider every timestamp in `timestamps` committed, even though
    /// they were not when the snapshot was taken.
    ///
    /// Used by the flush path: the set of commits going into a flushed
    /// file need not be a consistent MVCC snapshot, yet the scanner over
    /// that file has to represent the set exactly.
    pub fn add_committed_timestamps(&mut self, timestamps: &[Timestamp]) {
        for &ts in timestamps {
            self.add_committed(ts);
        }
    }

    /// Raise the floor to `watermark`: drop list entries below it and, if
    /// the list empties, collapse the upper watermark onto it so the two
    /// never cross.
    pub(crate) fn advance_floor(&mut self, watermark: Timestamp) {
        self.all_committed_before = watermark;
        self.committed_timestamps.retain(|ts| *ts >= watermark);
        if self.committed_timestamps.is_empty() {
            self.none_committed_at_or_after = watermark;
        }
    }

    fn committed_contains(&self, timestamp: Timestamp) -> bool {
        self.committed_timestamps.contains(&timestamp)
    }
}

impl Default for MvccSnapshot {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Timestamp> for MvccSnapshot {
    /// The clean snapshot at `timestamp`: every op below it committed,
    /// every other op not.
    fn from(timestamp: Timestamp) -> Self {
        Self {
            all_committed_before: timestamp,
            none_committed_at_or_after: timestamp,
            committed_timestamps: SmallVec::new(),
        }
    }
}

impl fmt::Display for MvccSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MvccSnapshot[committed={{T|T < {}", self.all_committed_before)?;
        if !self.committed_timestamps.is_empty() {
            f.write_str(" or (T in {")?;
            for (i, ts) in self.committed_timestamps.iter().enumerate() {
                if i > 0 {
                    f.write_str(",")?;
                }
                write!(f, "{ts}")?;
            }
            f.write_str("})")?;
        }
        f.write_str("}]")
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn ts(raw: u64) -> Timestamp {
        Timestamp::new(raw)
    }

    /// A snapshot with floor 10, sparse commits at 11 and 13.
    fn sparse_snapshot() -> MvccSnapshot {
        let mut snap = MvccSnapshot::from(ts(10));
        snap.add_committed(ts(11));
        snap.add_committed(ts(13));
        snap
    }

    #[test]
    fn test_point_in_time_snapshot() {
        let snap = MvccSnapshot::from(ts(10));
        assert!(snap.is_committed(ts(1)));
        assert!(snap.is_committed(ts(9)));
        assert!(!snap.is_committed(ts(10)));
        assert!(!snap.is_committed(ts(11)));
        assert!(snap.is_clean());
    }

    #[test]
    fn test_initial_snapshot_commits_nothing_mintable() {
        let snap = MvccSnapshot::new();
        assert_eq!(snap.to_string(), "MvccSnapshot[committed={T|T < 1}]");
        assert!(!snap.is_committed(ts(1)));
        assert!(!snap.is_committed(ts(2)));
    }

    #[test]
    fn test_may_have_committed_ops_at_or_after() {
        let snap = sparse_snapshot();
        assert_eq!(snap.none_committed_at_or_after, ts(14));

        assert!(snap.may_have_committed_ops_at_or_after(ts(9)));
        assert!(snap.may_have_committed_ops_at_or_after(ts(10)));
        assert!(snap.may_have_committed_ops_at_or_after(ts(12)));
        assert!(snap.may_have_committed_ops_at_or_after(ts(13)));
        assert!(!snap.may_have_committed_ops_at_or_after(ts(14)));
        assert!(!snap.may_have_committed_ops_at_or_after(ts(15)));

        let all = MvccSnapshot::all_ops();
        assert!(all.may_have_committed_ops_at_or_after(ts(1)));
        assert!(all.may_have_committed_ops_at_or_after(ts(12345)));

        let none = MvccSnapshot::no_ops();
        assert!(!none.may_have_committed_ops_at_or_after(ts(1)));
        assert!(!none.may_have_committed_ops_at_or_after(ts(12345)));

        let clean = MvccSnapshot::from(ts(10));
        assert!(clean.may_have_committed_ops_at_or_after(ts(9)));
        assert!(!clean.may_have_committed_ops_at_or_after(ts(10)));
    }

    #[test]
    fn test_may_have_uncommitted_ops_at_or_before() {
        let snap = sparse_snapshot();

        assert!(!snap.may_have_uncommitted_ops_at_or_before(ts(9)));
        assert!(snap.may_have_uncommitted_ops_at_or_before(ts(10)));
        assert!(snap.may_have_uncommitted_ops_at_or_before(ts(11)));
        assert!(snap.may_have_uncommitted_ops_at_or_before(ts(13)));
        assert!(snap.may_have_uncommitted_ops_at_or_before(ts(14)));
        assert!(snap.may_have_uncommitted_ops_at_or_before(ts(15)));

        let all = MvccSnapshot::all_ops();
        assert!(!all.may_have_uncommitted_ops_at_or_before(ts(1)));
        assert!(!all.may_have_uncommitted_ops_at_or_before(ts(12345)));

        let none = MvccSnapshot::no_ops();
        assert!(none.may_have_uncommitted_ops_at_or_before(ts(1)));
        assert!(none.may_have_uncommitted_ops_at_or_before(ts(12345)));

        let clean = MvccSnapshot::from(ts(10));
        assert!(!clean.may_have_uncommitted_ops_at_or_before(ts(9)));
        assert!(clean.may_have_uncommitted_ops_at_or_before(ts(10)));
    }

    #[test]
    fn test_no_uncommitted_when_floor_timestamp_is_committed() {
        // The last in-flight op committed exactly at the floor: nothing was
        // left to advance the floor past it, but there still cannot be any
        // uncommitted op at or below it.
        let mut snap = MvccSnapshot::from(ts(10));
        snap.add_committed(ts(10));
        assert!(!snap.may_have_uncommitted_ops_at_or_before(ts(10)));
    }

    #[test]
    fn test_add_committed_bumps_upper_watermark() {
        let mut snap = MvccSnapshot::from(ts(5));
        snap.add_committed(ts(7));
        assert_eq!(snap.none_committed_at_or_after, ts(8));
        assert!(snap.is_committed(ts(7)));
        assert!(!snap.is_committed(ts(6)));

        // A lower out-of-order commit does not move the upper watermark.
        snap.add_committed(ts(6));
        assert_eq!(snap.none_committed_at_or_after, ts(8));
        assert!(snap.is_committed(ts(6)));
    }

    #[test]
    fn test_add_committed_is_idempotent() {
        let mut snap = MvccSnapshot::from(ts(5));
        snap.add_committed(ts(7));
        let once = snap.clone();
        snap.add_committed(ts(7));
        assert_eq!(snap, once);

        // Already below the floor: also a no-op.
        snap.add_committed(ts(3));
        assert_eq!(snap, once);
    }

    #[test]
    fn test_add_committed_timestamps_bulk() {
        let mut snap = MvccSnapshot::from(ts(1));
        snap.add_committed_timestamps(&[ts(2), ts(4), ts(2)]);
        assert!(snap.is_committed(ts(2)));
        assert!(!snap.is_committed(ts(3)));
        assert!(snap.is_committed(ts(4)));
        assert_eq!(snap.committed_timestamps.len(), 2);
    }

    #[test]
    fn test_advance_floor_drops_covered_commits() {
        let mut snap = sparse_snapshot();
        snap.advance_floor(ts(12));
        assert_eq!(snap.all_committed_before, ts(12));
        assert_eq!(snap.committed_timestamps.as_slice(), &[ts(13)]);
        assert_eq!(snap.none_committed_at_or_after, ts(14));

        // Covering the whole list collapses the upper watermark.
        snap.advance_floor(ts(14));
        assert!(snap.is_clean());
        assert_eq!(snap.none_committed_at_or_after, ts(14));
    }

    #[test]
    fn test_advance_floor_is_idempotent() {
        let mut snap = sparse_snapshot();
        snap.advance_floor(ts(12));
        let once = snap.clone();
        snap.advance_floor(ts(12));
        assert_eq!(snap, once);
    }

    #[test]
    fn test_display_forms() {
        let mut snap = MvccSnapshot::from(ts(1));
        assert_eq!(snap.to_string(), "MvccSnapshot[committed={T|T < 1}]");

        snap.add_committed(ts(2));
        snap.add_committed(ts(3));
        assert_eq!(
            snap.to_string(),
            "MvccSnapshot[committed={T|T < 1 or (T in {2,3})}]"
        );
    }

    #[test]
    fn test_equality_is_structural() {
        let a = sparse_snapshot();
        let b = sparse_snapshot();
        assert_eq!(a, b);

        let mut c = sparse_snapshot();
        c.add_committed(ts(15));
        assert_ne!(a, c);
    }

    proptest! {
        /// Anything committed implies a committed op at or after it may
        /// exist, and anything strictly below the floor can have no
        /// uncommitted op at or before it.
        #[test]
        fn prop_query_consistency(
            floor in 0_u64..20,
            extra in proptest::collection::vec(0_u64..40, 0..6),
            probe in 0_u64..45,
        ) {
            let mut snap = MvccSnapshot::from(Timestamp::new(floor));
            for raw in extra {
                snap.add_committed(Timestamp::new(raw));
            }
            let probe = Timestamp::new(probe);

            if snap.is_committed(probe) {
                prop_assert!(snap.may_have_committed_ops_at_or_after(probe));
            }
            if probe < snap.all_committed_before {
                prop_assert!(!snap.may_have_uncommitted_ops_at_or_before(probe));
            }
        }

        /// The structural invariants survive any add/advance sequence.
        #[test]
        fn prop_mutation_preserves_invariants(
            floor in 0_u64..10,
            steps in proptest::collection::vec((any::<bool>(), 0_u64..40), 0..12),
        ) {
            let mut snap = MvccSnapshot::from(Timestamp::new(floor));
            let mut high_water = floor;
            for (advance, raw) in steps {
                if advance {
                    // The registry only ever moves the floor forward.
                    high_water = high_water.max(raw);
                    snap.advance_floor(Timestamp::new(high_water));
                } else {
                    snap.add_committed(Timestamp::new(raw));
                }

                prop_assert!(snap.all_committed_before <= snap.none_committed_at_or_after);
                if snap.committed_timestamps.is_empty() {
                    prop_assert_eq!(snap.none_committed_at_or_after, snap.all_committed_before);
                }
                for &t in &snap.committed_timestamps {
                    prop_assert!(snap.all_committed_before <= t);
                    prop_assert!(t < snap.none_committed_at_or_after);
                }
                let mut dedup = snap.committed_timestamps.to_vec();
                dedup.sort_unstable();
                dedup.dedup();
                prop_assert_eq!(dedup.len(), snap.committed_timestamps.len());
            }
        }

        /// `add_committed` twice is the same as once.
        #[test]
        fn prop_add_committed_idempotent(floor in 0_u64..10, raw in 0_u64..30) {
            let mut snap = MvccSnapshot::from(Timestamp::new(floor));
            snap.add_committed(Timestamp::new(raw));
            let once = snap.clone();
            snap.add_committed(Timestamp::new(raw));
            prop_assert_eq!(snap, once);
        }
    }
}
