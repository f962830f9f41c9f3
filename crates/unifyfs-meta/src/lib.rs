//! The sharded ordered-KV metadata layer (spec.md §4.3 "Extent KV Adapter",
//! §4.4 "Attribute KV Adapter"): key encoding, the sharding function, a
//! per-shard RocksDB-backed store, and a scatter-gather client that fans a
//! multi-range query out across the shard roster.

mod client;
mod key;
mod service;
mod store;

pub use client::{ExtentKv, PutError, RangeGetError};
pub use key::{shards_for_range, AttrKey, ExtentKey, STRIPE_COUNT_PER_FILE};
pub use service::ExtentShardService;
pub use store::{Error, ExtentValue, ShardStore, ATTRS_CF, EXTENTS_CF};
