use std::fs::File;
use std::mem::size_of;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use memmap2::MmapMut;

use crate::{Error, Result};

/// A single raw entry the client stages into its index buffer before the
/// delegator's Flush Coordinator (C7) drains and coalesces it (spec.md
/// §4.2): `(fid, file_pos, mem_pos, length)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct RawIndexEntry {
    pub fid: u64,
    pub file_pos: u64,
    pub mem_pos: u64,
    pub length: u64,
}

const ENTRY_SIZE: usize = size_of::<RawIndexEntry>();
const HEADER_SIZE: usize = size_of::<u64>();

impl RawIndexEntry {
    fn to_bytes(self) -> [u8; ENTRY_SIZE] {
        let mut buf = [0u8; ENTRY_SIZE];
        buf[0..8].copy_from_slice(&self.fid.to_le_bytes());
        buf[8..16].copy_from_slice(&self.file_pos.to_le_bytes());
        buf[16..24].copy_from_slice(&self.mem_pos.to_le_bytes());
        buf[24..32].copy_from_slice(&self.length.to_le_bytes());
        buf
    }

    fn from_bytes(buf: &[u8]) -> Self {
        RawIndexEntry {
            fid: u64::from_le_bytes(buf[0..8].try_into().unwrap()),
            file_pos: u64::from_le_bytes(buf[8..16].try_into().unwrap()),
            mem_pos: u64::from_le_bytes(buf[16..24].try_into().unwrap()),
            length: u64::from_le_bytes(buf[24..32].try_into().unwrap()),
        }
    }
}

/// The client-side index region (spec.md §4.2): a header holding
/// `num_entries` followed by a fixed-capacity array of [`RawIndexEntry`].
///
/// The client is the sole writer and appends with a `Release` store to
/// `num_entries` after the entry bytes are in place; the delegator is the
/// sole reader and `Acquire`-loads `num_entries` before reading entries
/// below it ("write-fence at client side and a read-fence on the delegator
/// side at fsync time", spec.md §4.2). Neither side mutates an entry once
/// it is below the last-observed `num_entries`.
pub struct IndexBuffer {
    mmap: MmapMut,
    capacity: usize,
}

impl IndexBuffer {
    /// Create a new index region backed by `file`, sized for `capacity`
    /// entries, and map it for read-write access.
    pub fn create(file: &File, capacity: usize) -> Result<Self> {
        file.set_len((HEADER_SIZE + capacity * ENTRY_SIZE) as u64)?;
        let mmap = unsafe { MmapMut::map_mut(file)? };
        Ok(IndexBuffer { mmap, capacity })
    }

    /// Map an index region that has already been created and sized
    /// (the delegator's view of a client's buffer).
    pub fn open(file: &File, capacity: usize) -> Result<Self> {
        let mmap = unsafe { MmapMut::map_mut(file)? };
        Ok(IndexBuffer { mmap, capacity })
    }

    fn num_entries_atomic(&self) -> &AtomicU64 {
        // The header occupies the first 8 bytes of the mapping; alignment
        // is guaranteed because `memmap2` pages are OS-page aligned.
        unsafe { &*(self.mmap.as_ptr() as *const AtomicU64) }
    }

    /// Number of entries currently visible to a reader (delegator side),
    /// `Acquire`-ordered against the writer's entry bytes.
    pub fn num_entries(&self) -> u64 {
        self.num_entries_atomic().load(Ordering::Acquire)
    }

    /// Append an entry (client side). Fails with [`Error::Full`] once
    /// `capacity` entries have been written; the client must fsync (which
    /// drains and resets the buffer) before appending more.
    pub fn push(&mut self, entry: RawIndexEntry) -> Result<()> {
        let num_entries = self.num_entries() as usize;
        if num_entries >= self.capacity {
            return Err(Error::Full { capacity: self.capacity });
        }

        let offset = HEADER_SIZE + num_entries * ENTRY_SIZE;
        self.mmap[offset..offset + ENTRY_SIZE].copy_from_slice(&entry.to_bytes());

        self.num_entries_atomic()
            .store(num_entries as u64 + 1, Ordering::Release);
        Ok(())
    }

    /// Read the entry at `index` (delegator side). Panics if `index` is
    /// not below the last-observed [`IndexBuffer::num_entries`]; callers
    /// must bound their loop with that value, per spec.md §4.7 step 1.
    pub fn entry(&self, index: u64) -> RawIndexEntry {
        let offset = HEADER_SIZE + index as usize * ENTRY_SIZE;
        RawIndexEntry::from_bytes(&self.mmap[offset..offset + ENTRY_SIZE])
    }

    /// Reset the buffer to empty (delegator side, after a successful
    /// fsync drain).
    pub fn clear(&mut self) {
        self.num_entries_atomic().store(0, Ordering::Release);
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Copy out every currently-visible entry and reset the buffer to
    /// empty, atomically with respect to this call (spec.md §4.7 step 1:
    /// "read num_entries from the client's index-region header"). Takes
    /// `&mut self` so the delegator's drain is a single, short, fully
    /// synchronous critical section that a caller can complete before
    /// handing the copied entries off to anything that awaits.
    pub fn drain(&mut self) -> Vec<RawIndexEntry> {
        let num_entries = self.num_entries();
        let entries = (0..num_entries).map(|i| self.entry(i)).collect();
        self.clear();
        entries
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn backing_file(capacity: usize) -> File {
        let file = tempfile::tempfile().unwrap();
        file.set_len((HEADER_SIZE + capacity * ENTRY_SIZE) as u64).unwrap();
        file
    }

    #[test]
    fn append_and_read_back_in_order() {
        let file = backing_file(4);
        let mut buf = IndexBuffer::create(&file, 4).unwrap();

        buf.push(RawIndexEntry { fid: 1, file_pos: 0, mem_pos: 0, length: 100 }).unwrap();
        buf.push(RawIndexEntry { fid: 1, file_pos: 100, mem_pos: 100, length: 50 }).unwrap();

        assert_eq!(buf.num_entries(), 2);
        assert_eq!(buf.entry(0), RawIndexEntry { fid: 1, file_pos: 0, mem_pos: 0, length: 100 });
        assert_eq!(buf.entry(1), RawIndexEntry { fid: 1, file_pos: 100, mem_pos: 100, length: 50 });
    }

    #[test]
    fn push_past_capacity_fails() {
        let file = backing_file(1);
        let mut buf = IndexBuffer::create(&file, 1).unwrap();

        buf.push(RawIndexEntry { fid: 1, file_pos: 0, mem_pos: 0, length: 1 }).unwrap();
        let err = buf.push(RawIndexEntry { fid: 1, file_pos: 1, mem_pos: 1, length: 1 });
        assert!(matches!(err, Err(Error::Full { capacity: 1 })));
    }

    #[test]
    fn clear_resets_entries_for_reuse() {
        let file = backing_file(2);
        let mut buf = IndexBuffer::create(&file, 2).unwrap();
        buf.push(RawIndexEntry { fid: 1, file_pos: 0, mem_pos: 0, length: 1 }).unwrap();
        buf.clear();
        assert_eq!(buf.num_entries(), 0);

        buf.push(RawIndexEntry { fid: 2, file_pos: 0, mem_pos: 0, length: 2 }).unwrap();
        assert_eq!(buf.num_entries(), 1);
        assert_eq!(buf.entry(0).fid, 2);
    }

    #[test]
    fn delegator_view_observes_client_writes() {
        let file = backing_file(2);
        let mut writer = IndexBuffer::create(&file, 2).unwrap();
        writer.push(RawIndexEntry { fid: 9, file_pos: 0, mem_pos: 0, length: 10 }).unwrap();

        let reader = IndexBuffer::open(&file, 2).unwrap();
        assert_eq!(reader.num_entries(), 1);
        assert_eq!(reader.entry(0).fid, 9);
    }

    #[test]
    fn drain_copies_entries_and_resets_the_buffer() {
        let file = backing_file(2);
        let mut buf = IndexBuffer::create(&file, 2).unwrap();
        buf.push(RawIndexEntry { fid: 1, file_pos: 0, mem_pos: 0, length: 10 }).unwrap();
        buf.push(RawIndexEntry { fid: 1, file_pos: 10, mem_pos: 10, length: 5 }).unwrap();

        let drained = buf.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(buf.num_entries(), 0);

        buf.push(RawIndexEntry { fid: 2, file_pos: 0, mem_pos: 0, length: 1 }).unwrap();
        assert_eq!(buf.num_entries(), 1);
    }
}
