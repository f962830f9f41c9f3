//! The write-coalescing segment index (spec.md §4.1, "C1").
//!
//! A [`SegmentTree`] is a thread-safe, non-overlapping interval index for a
//! single file: each [`Segment`] maps a logical `[start, end]` byte range to
//! a physical log offset (`ptr`), and inserting an overlapping range trims
//! or deletes whatever was there before it so that later writes always win.

mod tree;

pub use tree::{Error, Inner, Segment, SegmentTree};
