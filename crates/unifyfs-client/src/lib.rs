//! The client-side read path (Request Manager, C5) and the delegator-side
//! fsync path (Flush Coordinator, C7) of spec.md §4.5/§4.7, generalized
//! from `journal-client`'s read-dispatch and append-flush modules: where
//! the teacher dispatches a single read to one routed broker, the Request
//! Manager here partitions a batch of reads by destination delegator and
//! dispatches one RPC per destination concurrently.

mod flush;
mod reply;
mod request_manager;

pub use flush::{FlushCoordinator, PendingAttr};
pub use reply::ReplyAssembler;
pub use request_manager::{ReadRequest, RequestManager};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    RangeGet(#[from] unifyfs_meta::RangeGetError),
    #[error(transparent)]
    Put(#[from] unifyfs_meta::PutError),
    #[error(transparent)]
    Rpc(#[from] unifyfs_rpc::Error),
    #[error(transparent)]
    Grpc(#[from] tonic::Status),
    #[error(transparent)]
    Store(#[from] unifyfs_meta::Error),
    #[error(transparent)]
    Segment(#[from] unifyfs_segment::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
