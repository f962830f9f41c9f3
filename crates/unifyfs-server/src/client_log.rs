use std::fs::File;
use std::os::unix::fs::FileExt;

use unifyfs_shm::ByteRegion;

#[derive(Debug, thiserror::Error)]
pub enum ReadError {
    #[error("read at offset {offset} falls past the superblock with no spillover file open")]
    NoSpillover { offset: u64 },
    #[error("unknown client (app_id={app_id}, client_id={client_id})")]
    UnknownClient { app_id: u32, client_id: u32 },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// One locally-hosted client's data log: the shared-memory superblock it
/// writes into directly, plus the on-disk spillover file opened once the
/// superblock fills (spec.md §4.6, §6 "Spillover"). Grounded on
/// `unifyfs-shm::ByteRegion`'s own doc comment, which names this exact
/// split as the reason the region is a bare byte buffer with framing left
/// to the caller.
pub struct ClientLog {
    superblock: ByteRegion,
    spillover: Option<File>,
}

impl ClientLog {
    pub fn new(superblock: ByteRegion, spillover: Option<File>) -> Self {
        Self { superblock, spillover }
    }

    /// Read `length` bytes starting at data-log offset `offset` (spec.md
    /// §4.6: "copying from the identified client's shared-memory
    /// superblock, or by `pread` on the client's spillover file if the
    /// offset lies past the superblock"). A read may straddle the
    /// boundary; that shouldn't occur given pointer continuity within a
    /// single extent; handled anyway for robustness.
    pub fn read_at(&self, offset: u64, length: u64) -> Result<Vec<u8>, ReadError> {
        let superblock_len = self.superblock.len() as u64;

        if offset + length <= superblock_len {
            return Ok(self.superblock.read_at(offset as usize, length as usize).to_vec());
        }

        if offset >= superblock_len {
            return self.pread_spillover(offset - superblock_len, length);
        }

        let in_superblock = (superblock_len - offset) as usize;
        let mut buf = self.superblock.read_at(offset as usize, in_superblock).to_vec();
        buf.extend(self.pread_spillover(0, length - in_superblock as u64)?);
        Ok(buf)
    }

    fn pread_spillover(&self, offset: u64, length: u64) -> Result<Vec<u8>, ReadError> {
        let file = self.spillover.as_ref().ok_or(ReadError::NoSpillover { offset })?;
        let mut buf = vec![0u8; length as usize];
        file.read_exact_at(&mut buf, offset)?;
        Ok(buf)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn superblock_of(bytes: &[u8]) -> ByteRegion {
        let file = tempfile::tempfile().unwrap();
        let mut region = ByteRegion::create(&file, bytes.len()).unwrap();
        region.write_at(0, bytes);
        region
    }

    #[test]
    fn reads_entirely_within_the_superblock() {
        let log = ClientLog::new(superblock_of(b"hello world!"), None);
        assert_eq!(log.read_at(0, 5).unwrap(), b"hello");
        assert_eq!(log.read_at(6, 6).unwrap(), b"world!");
    }

    #[test]
    fn read_past_the_superblock_without_spillover_fails() {
        let log = ClientLog::new(superblock_of(b"abcd"), None);
        assert!(log.read_at(4, 4).is_err());
    }

    #[test]
    fn read_past_the_superblock_falls_through_to_spillover() {
        use std::io::Write;
        let mut file = tempfile::tempfile().unwrap();
        file.write_all(b"overflow-bytes").unwrap();

        let log = ClientLog::new(superblock_of(b"abcd"), Some(file));
        assert_eq!(log.read_at(4, 8).unwrap(), b"overflow");
    }

    #[test]
    fn read_straddling_the_superblock_boundary_stitches_both_sources() {
        use std::io::Write;
        let mut file = tempfile::tempfile().unwrap();
        file.write_all(b"EFGH").unwrap();

        let log = ClientLog::new(superblock_of(b"ABCD"), Some(file));
        assert_eq!(log.read_at(2, 4).unwrap(), b"CDEF");
    }
}
