//! gRPC channel management shared by the client and the delegator binary
//! (spec.md §6, ambient component A2): a static roster of delegator peers,
//! lazily-dialed and cached [`tonic::transport::Channel`]s, and a bearer-
//! token [`Interceptor`] for the rare deployment that fronts the roster with
//! an authenticating proxy.
//!
//! Generalized from the teacher's journal-broker router (`gazette::Router`):
//! that router resolves a *dynamically discovered* topology (`broker::Route`)
//! to a member and dials it. UnifyFS delegators are not discovered; they are
//! configured (`unifyfs-config::Roster`), so this version drops route
//! resolution and zone-aware picking and keeps only the dial-and-cache core.

mod interceptor;
mod router;

pub use interceptor::Interceptor;
pub use router::{DelegatorId, Router};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid gRPC endpoint: '{0}'")]
    InvalidEndpoint(String),
    #[error(transparent)]
    Transport(#[from] tonic::transport::Error),
    #[error(transparent)]
    Grpc(#[from] tonic::Status),
    #[error("unknown delegator id {0}")]
    UnknownDelegator(DelegatorId),
}

/// Dial a single gRPC endpoint, lazily (no connection is attempted until
/// the first RPC). Mirrors the teacher's (missing from the retrieval pack)
/// `gazette::dial_channel`: a plain `tonic` endpoint build, kept as its own
/// function so `Router` stays free of endpoint-string parsing concerns.
async fn dial_channel(endpoint: &str) -> Result<tonic::transport::Channel, Error> {
    let uri: tonic::transport::Uri = endpoint
        .parse()
        .map_err(|_| Error::InvalidEndpoint(endpoint.to_string()))?;

    Ok(tonic::transport::Endpoint::from(uri).connect().await?)
}
