use std::fs::File;

use memmap2::MmapMut;

use crate::Result;

/// A fixed-capacity shared-memory byte region: the client's data-log
/// superblock, or the client's reply buffer that a delegator's Request
/// Manager steers RPC replies into at a caller-chosen logical offset
/// (spec.md §4.5, "Reply assembly"). Plain byte access; the caller is
/// responsible for any header/record framing within it.
pub struct ByteRegion {
    mmap: MmapMut,
}

impl ByteRegion {
    pub fn create(file: &File, capacity: usize) -> Result<Self> {
        file.set_len(capacity as u64)?;
        let mmap = unsafe { MmapMut::map_mut(file)? };
        Ok(ByteRegion { mmap })
    }

    pub fn open(file: &File) -> Result<Self> {
        let mmap = unsafe { MmapMut::map_mut(file)? };
        Ok(ByteRegion { mmap })
    }

    pub fn len(&self) -> usize {
        self.mmap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mmap.is_empty()
    }

    /// Copy `data` into the region starting at `offset`. Writes from
    /// concurrent, non-overlapping calls may become visible in any order
    /// (spec.md §4.5: replies may arrive out of order); callers that need
    /// ordering track it themselves (e.g. a tail pointer that only
    /// advances once a whole record is in place).
    pub fn write_at(&mut self, offset: usize, data: &[u8]) {
        self.mmap[offset..offset + data.len()].copy_from_slice(data);
    }

    pub fn read_at(&self, offset: usize, len: usize) -> &[u8] {
        &self.mmap[offset..offset + len]
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn write_then_read_back_at_an_offset() {
        let file = tempfile::tempfile().unwrap();
        let mut region = ByteRegion::create(&file, 64).unwrap();

        region.write_at(8, b"payload!");
        assert_eq!(region.read_at(8, 8), b"payload!");
        assert_eq!(region.len(), 64);
    }

    #[test]
    fn writes_at_disjoint_offsets_do_not_clobber_each_other() {
        let file = tempfile::tempfile().unwrap();
        let mut region = ByteRegion::create(&file, 32).unwrap();

        region.write_at(0, b"aaaa");
        region.write_at(16, b"bbbb");

        assert_eq!(region.read_at(0, 4), b"aaaa");
        assert_eq!(region.read_at(16, 4), b"bbbb");
    }
}
