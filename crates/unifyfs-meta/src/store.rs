use rocksdb::{IteratorMode, Options, WriteBatch, DB};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::key::{AttrKey, ExtentKey};

pub const EXTENTS_CF: &str = "extents";
pub const ATTRS_CF: &str = "attrs";

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Any failure surfaced by the backing ordered-KV store. Named after
    /// the reference implementation's MDHIM backend (spec.md §7 groups all
    /// KV-layer failures into one taxonomy entry regardless of which
    /// backend is behind C3/C4).
    #[error("metadata store error: {0}")]
    Mdhim(#[from] rocksdb::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// One metadata-server shard's ordered store (spec.md §4.3, §4.4): extent
/// records and attribute records live in separate column families of the
/// same `rocksdb::DB`, following `estuary-flow`'s `Registers` (one CF per
/// logical table, `DEFAULT_COLUMN_FAMILY_NAME` left unused).
///
/// Extent entries are "never overwritten in place" (spec.md §3): a put of
/// a key already present must coexist alongside earlier puts of that same
/// key rather than replace them, so a range get can return every version.
/// The physical RocksDB key is therefore the logical `ExtentKey` followed
/// by a per-store monotonic sequence number; a range scan groups by the
/// logical key first (it dominates ordering) and within it yields versions
/// oldest-sequence-first, which is arrival order ("readers interpret
/// later-arriving entries as fresher", spec.md §3).
pub struct ShardStore {
    db: DB,
    next_seq: AtomicU64,
}

/// An extent record as stored: `(gfid, offset) -> (addr, length,
/// delegator_id, app_id, rank)` (spec.md §3, §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtentValue {
    pub addr: u64,
    pub length: u64,
    pub delegator_id: u32,
    pub app_id: u32,
    pub rank: u32,
}

impl ExtentValue {
    fn encode(&self) -> [u8; 28] {
        let mut buf = [0u8; 28];
        buf[0..8].copy_from_slice(&self.addr.to_le_bytes());
        buf[8..16].copy_from_slice(&self.length.to_le_bytes());
        buf[16..20].copy_from_slice(&self.delegator_id.to_le_bytes());
        buf[20..24].copy_from_slice(&self.app_id.to_le_bytes());
        buf[24..28].copy_from_slice(&self.rank.to_le_bytes());
        buf
    }

    fn decode(buf: &[u8]) -> Self {
        ExtentValue {
            addr: u64::from_le_bytes(buf[0..8].try_into().unwrap()),
            length: u64::from_le_bytes(buf[8..16].try_into().unwrap()),
            delegator_id: u32::from_le_bytes(buf[16..20].try_into().unwrap()),
            app_id: u32::from_le_bytes(buf[20..24].try_into().unwrap()),
            rank: u32::from_le_bytes(buf[24..28].try_into().unwrap()),
        }
    }
}

fn physical_key(key: ExtentKey, seq: u64) -> [u8; 24] {
    let mut buf = [0u8; 24];
    buf[0..16].copy_from_slice(&key.encode());
    buf[16..24].copy_from_slice(&seq.to_be_bytes());
    buf
}

impl ShardStore {
    /// Open (creating if absent) the RocksDB instance at `path`, named
    /// `db_name` per `unifyfs-config`'s `meta_db_name` (spec.md §6).
    pub fn open(path: &Path, db_name: &str) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let db = DB::open_cf(&opts, path.join(db_name), [EXTENTS_CF, ATTRS_CF])?;
        Ok(ShardStore { db, next_seq: AtomicU64::new(0) })
    }

    fn extents_cf(&self) -> &rocksdb::ColumnFamily {
        self.db.cf_handle(EXTENTS_CF).expect("extents CF created at open")
    }

    fn attrs_cf(&self) -> &rocksdb::ColumnFamily {
        self.db.cf_handle(ATTRS_CF).expect("attrs CF created at open")
    }

    /// Batched put (spec.md §4.3): duplicate keys are permitted, no
    /// de-duplication on the server — each record is appended as its own
    /// version rather than overwriting a prior one at the same key.
    pub fn put_extents(&self, records: &[(ExtentKey, ExtentValue)]) -> Result<()> {
        let cf = self.extents_cf();
        let mut wb = WriteBatch::default();
        for (key, value) in records {
            let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
            wb.put_cf(cf, physical_key(*key, seq), value.encode());
        }
        self.db.write(wb)?;
        Ok(())
    }

    /// Scan this shard's local store for every stored pair whose key falls
    /// in `[start, end]` (spec.md §4.3, "Range Get"), including every
    /// coexisting version of a given logical key.
    pub fn range_get_extents(&self, start: ExtentKey, end: ExtentKey) -> Result<Vec<(ExtentKey, ExtentValue)>> {
        let cf = self.extents_cf();
        let lower = physical_key(start, 0);
        let upper_logical = end.encode();

        let mut out = Vec::new();
        let it = self
            .db
            .iterator_cf(cf, IteratorMode::From(&lower, rocksdb::Direction::Forward));

        for item in it {
            let (k, v) = item?;
            if k[0..16] > upper_logical[..] {
                break;
            }
            out.push((ExtentKey::decode(&k[0..16]), ExtentValue::decode(&v)));
        }
        Ok(out)
    }

    pub fn put_attr(&self, key: AttrKey, record: &[u8]) -> Result<()> {
        self.db.put_cf(self.attrs_cf(), key.encode(), record)?;
        Ok(())
    }

    pub fn get_attr(&self, key: AttrKey) -> Result<Option<Vec<u8>>> {
        Ok(self.db.get_cf(self.attrs_cf(), key.encode())?)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn store() -> (tempfile::TempDir, ShardStore) {
        let dir = tempfile::TempDir::new().unwrap();
        let store = ShardStore::open(dir.path(), "test-shard").unwrap();
        (dir, store)
    }

    fn value(addr: u64) -> ExtentValue {
        ExtentValue { addr, length: 10, delegator_id: 0, app_id: 0, rank: 0 }
    }

    #[test]
    fn put_then_range_get_observes_the_keys() {
        let (_dir, store) = store();
        let records = vec![
            (ExtentKey { gfid: 1, offset: 0 }, value(1000)),
            (ExtentKey { gfid: 1, offset: 100 }, value(2000)),
            (ExtentKey { gfid: 2, offset: 0 }, value(3000)),
        ];
        store.put_extents(&records).unwrap();

        let got = store
            .range_get_extents(ExtentKey { gfid: 1, offset: 0 }, ExtentKey { gfid: 1, offset: u64::MAX })
            .unwrap();
        assert_eq!(got.len(), 2);
        assert_eq!(got[0].1.addr, 1000);
        assert_eq!(got[1].1.addr, 2000);
    }

    #[test]
    fn duplicate_keys_coexist_oldest_first() {
        let (_dir, store) = store();
        let key = ExtentKey { gfid: 1, offset: 0 };
        store.put_extents(&[(key, value(1))]).unwrap();
        store.put_extents(&[(key, value(2))]).unwrap();

        let got = store.range_get_extents(key, key).unwrap();
        assert_eq!(got.len(), 2, "both versions of the key must coexist");
        assert_eq!(got[0].1.addr, 1, "earlier arrival sorts first");
        assert_eq!(got[1].1.addr, 2, "later arrival is the freshest");
    }

    #[test]
    fn attr_put_then_get_round_trips() {
        let (_dir, store) = store();
        store.put_attr(AttrKey(7), b"attr-bytes").unwrap();
        assert_eq!(store.get_attr(AttrKey(7)).unwrap().as_deref(), Some(&b"attr-bytes"[..]));
        assert_eq!(store.get_attr(AttrKey(8)).unwrap(), None);
    }
}
