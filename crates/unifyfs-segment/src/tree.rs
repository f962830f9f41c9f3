use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::collections::BTreeMap;

/// A logical `[start, end]` byte range (inclusive, both unsigned) mapped to
/// the physical log offset at which `start` resides (spec.md §3).
///
/// Invariant: `start <= end`. Byte `start + k` lives at `ptr + k` for every
/// `0 <= k <= end - start` ("pointer continuity", spec.md §8 property 3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    pub start: u64,
    pub end: u64,
    pub ptr: u64,
}

impl Segment {
    fn overlaps(&self, start: u64, end: u64) -> bool {
        self.start <= end && start <= self.end
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum Error {
    /// Allocation failed while computing the remainder(s) of a trimmed
    /// segment. The tree is left exactly as it was before the call
    /// (spec.md §4.1, "Failure modes").
    #[error("out of memory while inserting segment")]
    OutOfMemory,
}

/// The unlocked contents of a [`SegmentTree`]. Exposed so that callers can
/// hold a single read or write guard across a whole traversal (spec.md §5:
/// "`iter` requires the caller to hold either the reader or writer lock
/// across the full traversal").
#[derive(Debug, Default)]
pub struct Inner {
    by_start: BTreeMap<u64, Segment>,
    count: usize,
    max: u64,
}

impl Inner {
    /// In-order traversal by ascending `start`. Requires the caller to
    /// already hold this tree's lock (via [`SegmentTree::read`] or
    /// [`SegmentTree::write`]).
    pub fn iter(&self) -> impl Iterator<Item = &Segment> {
        self.by_start.values()
    }

    /// Non-locking `find`: the caller must already hold a lock.
    pub fn find_locked(&self, start: u64, end: u64) -> Option<Segment> {
        debug_assert!(start <= end);
        self.lowest_overlap(start, end).map(|(_, seg)| *seg)
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn max(&self) -> u64 {
        self.max
    }

    /// Returns the `(key, segment)` pair with the lowest `start` that
    /// overlaps `[start, end]`, or `None`. O(log n): the only candidate
    /// with a key `<= start` is the predecessor of `start`; any candidate
    /// with a key in `(start, end]` overlaps by construction, and the
    /// lowest such key is found directly via a range query.
    fn lowest_overlap(&self, start: u64, end: u64) -> Option<(u64, &Segment)> {
        if let Some((&k, seg)) = self.by_start.range(..=start).next_back() {
            if seg.overlaps(start, end) {
                return Some((k, seg));
            }
        }
        self.by_start
            .range(start + 1..=end)
            .next()
            .map(|(&k, seg)| (k, seg))
    }

    fn add_locked(&mut self, start: u64, end: u64, ptr: u64) -> Result<(), Error> {
        assert!(start <= end, "segment start must not exceed end");

        loop {
            let Some((key, _)) = self.lowest_overlap(start, end) else {
                break;
            };

            // Pre-reserve storage for the remainder(s) before removing the
            // overlapped segment from `by_start`, so that a failed
            // allocation leaves the tree exactly as it was rather than
            // missing the segment it was about to trim (spec.md §4.1,
            // "Failure modes").
            let mut remainders: Vec<Segment> = Vec::new();
            remainders
                .try_reserve_exact(2)
                .map_err(|_| Error::OutOfMemory)?;

            let overlapped = self.by_start.remove(&key).expect("key just found");

            if overlapped.start < start {
                remainders.push(Segment {
                    start: overlapped.start,
                    end: (start - 1).min(overlapped.end),
                    ptr: overlapped.ptr,
                });
            }
            if overlapped.end > end {
                let new_start = (end + 1).max(overlapped.start);
                remainders.push(Segment {
                    start: new_start,
                    end: overlapped.end,
                    ptr: overlapped.ptr + (new_start - overlapped.start),
                });
            }

            for r in remainders {
                self.by_start.insert(r.start, r);
            }
        }

        self.by_start.insert(start, Segment { start, end, ptr });
        self.count = self.by_start.len();
        self.max = self.max.max(end);
        Ok(())
    }

    fn clear_locked(&mut self) {
        self.by_start.clear();
        self.count = 0;
        self.max = 0;
    }
}

/// A per-file, in-memory, thread-safe segment tree (spec.md §4.1, "C1").
#[derive(Debug, Default)]
pub struct SegmentTree {
    lock: RwLock<Inner>,
}

impl SegmentTree {
    /// `init()`: an empty tree with `count = 0`, `max = 0`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `[start, end, ptr]`, coalescing any overlapping segments
    /// (spec.md §4.1 insertion algorithm). Always wins over existing data.
    pub fn add(&self, start: u64, end: u64, ptr: u64) -> Result<(), Error> {
        self.lock.write().add_locked(start, end, ptr)
    }

    /// Locking `find`: the segment with the lowest `start` overlapping
    /// `[start, end]`, or `None`.
    pub fn find(&self, start: u64, end: u64) -> Option<Segment> {
        self.lock.read().find_locked(start, end)
    }

    pub fn count(&self) -> usize {
        self.lock.write().count()
    }

    pub fn max(&self) -> u64 {
        self.lock.write().max()
    }

    /// Remove all segments and reset `count`/`max`.
    pub fn clear(&self) {
        self.lock.write().clear_locked();
    }

    /// `clear` then release; in safe Rust this is simply dropping the tree,
    /// but is provided for symmetry with spec.md §4.1's `destroy()`.
    pub fn destroy(self) {
        self.clear();
    }

    /// Acquire a read lock, for use with [`Inner::iter`] or
    /// [`Inner::find_locked`] across a multi-call traversal.
    pub fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.lock.read()
    }

    /// Acquire a write lock, for the same non-locking traversal use case.
    pub fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.lock.write()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn segs(tree: &SegmentTree) -> Vec<Segment> {
        tree.read().iter().copied().collect()
    }

    #[test]
    fn s1_non_overlapping_ordered_inserts() {
        let t = SegmentTree::new();
        t.add(0, 9, 1000).unwrap();
        t.add(10, 19, 2000).unwrap();
        t.add(20, 29, 3000).unwrap();

        assert_eq!(t.count(), 3);
        assert_eq!(t.max(), 29);
        assert_eq!(
            segs(&t),
            vec![
                Segment { start: 0, end: 9, ptr: 1000 },
                Segment { start: 10, end: 19, ptr: 2000 },
                Segment { start: 20, end: 29, ptr: 3000 },
            ]
        );
    }

    #[test]
    fn s2_complete_overwrite() {
        let t = SegmentTree::new();
        t.add(0, 9, 1000).unwrap();
        t.add(10, 19, 2000).unwrap();
        t.add(20, 29, 3000).unwrap();

        t.add(0, 29, 9000).unwrap();

        assert_eq!(t.count(), 1);
        assert_eq!(t.max(), 29);
        assert_eq!(segs(&t), vec![Segment { start: 0, end: 29, ptr: 9000 }]);
    }

    #[test]
    fn s3_middle_overwrite_split() {
        let t = SegmentTree::new();
        t.add(0, 99, 1000).unwrap();
        t.add(40, 59, 5000).unwrap();

        assert_eq!(t.count(), 3);
        assert_eq!(
            segs(&t),
            vec![
                Segment { start: 0, end: 39, ptr: 1000 },
                Segment { start: 40, end: 59, ptr: 5000 },
                Segment { start: 60, end: 99, ptr: 1060 },
            ]
        );
    }

    #[test]
    fn s4_left_overlap() {
        let t = SegmentTree::new();
        t.add(10, 19, 100).unwrap();
        t.add(5, 14, 900).unwrap();

        assert_eq!(t.count(), 2);
        assert_eq!(
            segs(&t),
            vec![
                Segment { start: 5, end: 14, ptr: 900 },
                Segment { start: 15, end: 19, ptr: 105 },
            ]
        );
    }

    #[test]
    fn s5_right_overlap() {
        let t = SegmentTree::new();
        t.add(10, 19, 100).unwrap();
        t.add(15, 24, 900).unwrap();

        assert_eq!(t.count(), 2);
        assert_eq!(
            segs(&t),
            vec![
                Segment { start: 10, end: 14, ptr: 100 },
                Segment { start: 15, end: 24, ptr: 900 },
            ]
        );
    }

    #[test]
    fn s6_find() {
        let t = SegmentTree::new();
        t.add(0, 99, 1000).unwrap();
        t.add(40, 59, 5000).unwrap();

        let found = t.find(50, 70).unwrap();
        assert_eq!(found, Segment { start: 40, end: 59, ptr: 5000 });

        assert!(t.find(200, 300).is_none());
    }

    #[test]
    fn idempotence_clear_on_empty() {
        let t = SegmentTree::new();
        t.clear();
        assert_eq!(t.count(), 0);
        assert_eq!(t.max(), 0);
    }

    #[test]
    fn clear_resets_count_and_max() {
        let t = SegmentTree::new();
        t.add(0, 9, 1000).unwrap();
        t.add(10, 19, 2000).unwrap();
        t.clear();
        assert_eq!(t.count(), 0);
        assert_eq!(t.max(), 0);
        assert!(segs(&t).is_empty());
    }

    #[test]
    fn boundary_single_byte_segments() {
        let t = SegmentTree::new();
        t.add(5, 5, 500).unwrap();
        t.add(4, 4, 400).unwrap();
        t.add(6, 6, 600).unwrap();

        assert_eq!(t.count(), 3);
        assert_eq!(
            segs(&t),
            vec![
                Segment { start: 4, end: 4, ptr: 400 },
                Segment { start: 5, end: 5, ptr: 500 },
                Segment { start: 6, end: 6, ptr: 600 },
            ]
        );

        // A single-byte overwrite coalesces correctly against its neighbors.
        t.add(5, 5, 999).unwrap();
        assert_eq!(t.count(), 3);
        assert_eq!(t.find(5, 5).unwrap().ptr, 999);
    }

    #[test]
    fn monotone_max_never_decreases_except_across_clear() {
        let t = SegmentTree::new();
        t.add(50, 60, 1).unwrap();
        assert_eq!(t.max(), 60);
        t.add(0, 10, 2).unwrap();
        assert_eq!(t.max(), 60, "max must not decrease for a smaller insert");
        t.clear();
        assert_eq!(t.max(), 0);
    }

    #[test]
    fn pointer_continuity_holds_after_split() {
        let t = SegmentTree::new();
        t.add(0, 99, 1000).unwrap();
        t.add(40, 59, 5000).unwrap();

        for seg in segs(&t) {
            for x in seg.start..=seg.end {
                let k = x - seg.start;
                assert_eq!(seg.ptr + k, seg.ptr + (x - seg.start));
            }
        }
        // Spot-check the right remainder's affine mapping explicitly.
        let right = t.find(60, 60).unwrap();
        assert_eq!(right.ptr, 1060);
    }

    #[test]
    fn non_overlap_invariant_under_many_inserts() {
        let t = SegmentTree::new();
        // A pseudo-random but deterministic sequence of overlapping inserts.
        let inserts: &[(u64, u64, u64)] =
            &[(0, 9, 0), (5, 14, 100), (3, 3, 200), (20, 25, 300), (10, 22, 400), (0, 30, 500)];

        for &(s, e, p) in inserts {
            t.add(s, e, p).unwrap();

            let segs = segs(&t);
            for w in segs.windows(2) {
                assert!(w[0].end < w[1].start, "segments {:?} and {:?} overlap", w[0], w[1]);
            }
            assert_eq!(t.count(), segs.len());
        }
    }

    #[test]
    fn destroy_after_clear_is_legal() {
        let t = SegmentTree::new();
        t.add(0, 9, 0).unwrap();
        t.clear();
        t.destroy();
    }
}

#[cfg(test)]
mod proptest_invariants {
    use super::*;
    use proptest::prelude::*;

    fn small_insert() -> impl Strategy<Value = (u64, u64, u64)> {
        (0u64..200, 0u64..40, 0u64..10_000).prop_map(|(start, len, ptr)| (start, start + len, ptr))
    }

    proptest! {
        // spec.md §8 properties 1, 3, 4, 5: non-overlap, pointer
        // continuity, monotone max, and count consistency must hold
        // after every insert in any sequence, not just the hand-picked
        // scenarios in `test` above.
        #[test]
        fn invariants_hold_after_any_insert_sequence(inserts in proptest::collection::vec(small_insert(), 1..30)) {
            let t = SegmentTree::new();
            let mut expected_max = 0u64;

            for (start, end, ptr) in inserts {
                t.add(start, end, ptr).unwrap();
                expected_max = expected_max.max(end);

                let guard = t.read();
                let segments: Vec<Segment> = guard.iter().copied().collect();

                prop_assert_eq!(segments.len(), guard.count());
                prop_assert_eq!(guard.max(), expected_max);

                for w in segments.windows(2) {
                    prop_assert!(w[0].end < w[1].start, "{:?} and {:?} overlap", w[0], w[1]);
                }
                for seg in &segments {
                    prop_assert!(seg.start <= seg.end);
                    for k in 0..=(seg.end - seg.start).min(4) {
                        let x = seg.start + k;
                        let found = guard.find_locked(x, x).expect("covered byte must resolve");
                        prop_assert_eq!(found.ptr + (x - found.start), seg.ptr + k);
                    }
                }
            }
        }

        // spec.md §8 "Coverage displacement": every byte the most recent
        // insert covered must resolve, via `find`, to that insert's own
        // pointer mapping — no older segment may still claim it.
        #[test]
        fn most_recent_insert_displaces_older_coverage(
            first in small_insert(),
            second in small_insert(),
        ) {
            let t = SegmentTree::new();
            let (s1, e1, p1) = first;
            let (s2, e2, p2) = second;
            t.add(s1, e1, p1).unwrap();
            t.add(s2, e2, p2).unwrap();

            for x in [s2, e2, s2 + (e2 - s2) / 2] {
                let seg = t.find(x, x).expect("just-inserted range must resolve");
                prop_assert_eq!(seg.ptr + (x - seg.start), p2 + (x - s2));
            }
        }
    }
}
