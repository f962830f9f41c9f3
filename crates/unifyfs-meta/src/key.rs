/// Every stripe index reserves this many `range_size`-byte slots per file,
/// so that two different `gfid`s never collide in stripe space (spec.md
/// §4.3: "`s = fid × stripe_count_per_file + offset / range_size`"). This is
/// a deployment constant exactly like `range_size`: every delegator must
/// agree on it. 2^40 gives ample headroom for per-file offset growth
/// (`range_size * 2^40` bytes) without risking `u64` overflow when
/// multiplied by realistic `gfid` values.
pub const STRIPE_COUNT_PER_FILE: u64 = 1 << 40;

/// The extent KV key: lexicographic `(gfid, offset)` (spec.md §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ExtentKey {
    pub gfid: u64,
    pub offset: u64,
}

impl ExtentKey {
    /// Big-endian encoding so that RocksDB's default byte-lexicographic
    /// key ordering matches `(gfid, offset)` tuple ordering.
    pub fn encode(&self) -> [u8; 16] {
        let mut buf = [0u8; 16];
        buf[0..8].copy_from_slice(&self.gfid.to_be_bytes());
        buf[8..16].copy_from_slice(&self.offset.to_be_bytes());
        buf
    }

    pub fn decode(buf: &[u8]) -> Self {
        ExtentKey {
            gfid: u64::from_be_bytes(buf[0..8].try_into().unwrap()),
            offset: u64::from_be_bytes(buf[8..16].try_into().unwrap()),
        }
    }

    /// The stripe this key belongs to (spec.md §4.3).
    pub fn stripe(&self, range_size: u64) -> u64 {
        self.gfid
            .saturating_mul(STRIPE_COUNT_PER_FILE)
            .saturating_add(self.offset / range_size)
    }

    /// The metadata-shard index this key routes to.
    pub fn shard(&self, range_size: u64, num_metadata_servers: u64) -> u64 {
        self.stripe(range_size) % num_metadata_servers
    }
}

/// The attribute KV key: `gfid` (spec.md §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AttrKey(pub u64);

impl AttrKey {
    pub fn encode(&self) -> [u8; 8] {
        self.0.to_be_bytes()
    }

    /// Attribute records shard on `gfid` alone (degree-1 ranges, spec.md
    /// §4.4: "identical batch reply discipline as C3").
    pub fn shard(&self, num_metadata_servers: u64) -> u64 {
        self.0 % num_metadata_servers
    }
}

/// Split `[start, end]` (same `gfid`) into the per-stripe sub-ranges it
/// crosses, each tagged with the shard that owns it. A single logical
/// range-get request may straddle several stripes, each of which can be
/// owned by a different metadata server; the caller (`unifyfs-meta`'s
/// scatter-gather client) issues one sub-range per shard.
pub fn shards_for_range(
    start: ExtentKey,
    end: ExtentKey,
    range_size: u64,
    num_metadata_servers: u64,
) -> Vec<(u64, ExtentKey, ExtentKey)> {
    assert_eq!(start.gfid, end.gfid, "a range-get spans a single file");
    assert!(start.offset <= end.offset);

    let first_stripe = start.offset / range_size;
    let last_stripe = end.offset / range_size;

    (first_stripe..=last_stripe)
        .map(|stripe| {
            let sub_start = (stripe * range_size).max(start.offset);
            let sub_end = ((stripe + 1) * range_size - 1).min(end.offset);
            let shard = start
                .gfid
                .saturating_mul(STRIPE_COUNT_PER_FILE)
                .saturating_add(stripe)
                % num_metadata_servers;

            (
                shard,
                ExtentKey { gfid: start.gfid, offset: sub_start },
                ExtentKey { gfid: start.gfid, offset: sub_end },
            )
        })
        .collect()
}
