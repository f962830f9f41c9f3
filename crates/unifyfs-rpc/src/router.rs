use crate::Error;
use std::collections::HashMap;
use std::sync::Arc;
use tonic::transport::Channel;

/// Numeric id of a delegator process, stable for the lifetime of a roster
/// (spec.md §6's configured roster, not a discovered one).
pub type DelegatorId = u32;

// A Channel which may be:
// - Ready (if Some)
// - Currently being dialed (if locked)
// - Neither (None and not locked).
type DialState = Arc<futures::lock::Mutex<Option<Channel>>>;

/// Router dispatches requests to a fixed roster of delegator peers,
/// dialing each endpoint lazily on first use and reusing the channel for
/// every call after that.
///
/// Generalized from `gazette::Router`: UnifyFS has no dynamic topology to
/// resolve, so this keeps only the per-id dial cache and drops route/zone
/// selection.
#[derive(Clone)]
pub struct Router {
    inner: Arc<Inner>,
}

struct Inner {
    endpoints: HashMap<DelegatorId, String>,
    states: std::sync::Mutex<HashMap<DelegatorId, DialState>>,
}

impl Router {
    /// Build a router over a static `(id -> endpoint)` roster, as loaded
    /// from `unifyfs-config`.
    pub fn new(endpoints: HashMap<DelegatorId, String>) -> Self {
        Self {
            inner: Arc::new(Inner {
                endpoints,
                states: Default::default(),
            }),
        }
    }

    /// Return a ready [`Channel`] for `id`, dialing it if this is the
    /// first request routed there.
    pub async fn route(&self, id: DelegatorId) -> Result<Channel, Error> {
        let endpoint = self
            .inner
            .endpoints
            .get(&id)
            .ok_or(Error::UnknownDelegator(id))?;

        let state = {
            let mut states = self.inner.states.lock().unwrap();
            states.entry(id).or_default().clone()
        };

        // Acquire id-specific, async-aware lock so that two concurrent
        // callers racing to dial the same delegator don't open two
        // channels.
        let mut state = state.lock().await;

        if let Some(channel) = &*state {
            return Ok(channel.clone());
        }

        tracing::debug!(delegator_id = id, endpoint, "dialing delegator");
        let channel = crate::dial_channel(endpoint).await?;
        *state = Some(channel.clone());

        Ok(channel)
    }

    /// The full set of delegator ids this router knows how to reach, for
    /// fan-out callers (C5's per-destination dispatch, C3/C4's
    /// scatter-gather) that need to enumerate every shard.
    pub fn delegators(&self) -> impl Iterator<Item = DelegatorId> + '_ {
        self.inner.endpoints.keys().copied()
    }

    /// A ready `ExtentShard` client for the metadata shard hosted at `id`
    /// (C3/C4's point and range operations).
    pub async fn extent_shard_client(
        &self,
        id: DelegatorId,
        interceptor: crate::Interceptor,
    ) -> Result<ExtentShardClient, Error> {
        let channel = self.route(id).await?;
        Ok(proto_unifyfs::extent_shard_client::ExtentShardClient::with_interceptor(
            channel,
            interceptor,
        ))
    }

    /// A ready `Delegator` client for the peer delegator at `id` (C5's
    /// read dispatch, C7's fsync acknowledgement).
    pub async fn delegator_client(
        &self,
        id: DelegatorId,
        interceptor: crate::Interceptor,
    ) -> Result<DelegatorClient, Error> {
        let channel = self.route(id).await?;
        Ok(proto_unifyfs::delegator_client::DelegatorClient::with_interceptor(
            channel,
            interceptor,
        ))
    }
}

pub type ExtentShardClient = proto_unifyfs::extent_shard_client::ExtentShardClient<
    tonic::service::interceptor::InterceptedService<Channel, crate::Interceptor>,
>;

pub type DelegatorClient = proto_unifyfs::delegator_client::DelegatorClient<
    tonic::service::interceptor::InterceptedService<Channel, crate::Interceptor>,
>;

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn unknown_delegator_is_rejected_before_dialing() {
        let router = Router::new(HashMap::new());
        let err = router.route(7).await;
        assert!(matches!(err, Err(Error::UnknownDelegator(7))));
    }

    #[test]
    fn delegators_enumerates_the_configured_roster() {
        let router = Router::new(HashMap::from([
            (1, "http://127.0.0.1:9001".to_string()),
            (2, "http://127.0.0.1:9002".to_string()),
        ]));
        let mut ids: Vec<_> = router.delegators().collect();
        ids.sort();
        assert_eq!(ids, vec![1, 2]);
    }
}
