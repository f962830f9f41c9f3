//! Shared-memory region layouts for client/delegator data exchange
//! (spec.md §4.2, §6, ambient component A5): the superblock (client's data
//! log and reply area) and the raw index buffer (C2) that the client
//! appends to and the delegator drains on fsync.
//!
//! Out of scope at the design level (spec.md §1): segment creation and
//! placement (which shared-memory mechanism is used to actually share a
//! file descriptor between processes). This crate implements the regions
//! themselves as `memmap2`-backed files, following
//! `clockworklabs-SpacetimeDB`'s commit-log index file: a fixed-capacity
//! file mapped once, with a small atomic header and a flat array of
//! fixed-size records.

mod index;
mod region;

pub use index::{IndexBuffer, RawIndexEntry};
pub use region::ByteRegion;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("index buffer is full ({capacity} entries)")]
    Full { capacity: usize },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
