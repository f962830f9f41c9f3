//! Generated wire types and gRPC service definitions for the UnifyFS
//! delegator/metadata-shard protocol (spec.md §6). The `.proto` source lives
//! at `proto/unifyfs.proto`; `build.rs` compiles it with `tonic-build` into
//! this crate's `OUT_DIR` on every build.

tonic::include_proto!("unifyfs");

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Transport(#[from] tonic::transport::Error),
    #[error(transparent)]
    Grpc(#[from] tonic::Status),
}

pub type Result<T> = std::result::Result<T, Error>;
