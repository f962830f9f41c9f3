//! The Service Manager (C6) of spec.md §4.6: the delegator-side peer
//! surface that receives RPC read batches dispatched by another
//! delegator's Request Manager (C5), servicing them from a locally
//! hosted client's shared-memory superblock or spillover file, and the
//! fsync entrypoint that drives the Flush Coordinator (C7, in
//! `unifyfs-client`) to drain and publish that client's pending writes.

mod client_log;
mod registry;
mod service;

pub use client_log::{ClientLog, ReadError};
pub use registry::Registry;
pub use service::DelegatorService;
