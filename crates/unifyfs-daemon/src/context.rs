use std::collections::HashMap;
use std::sync::Arc;

use unifyfs_client::FlushCoordinator;
use unifyfs_config::Config;
use unifyfs_meta::{ExtentKv, ExtentShardService, ShardStore};
use unifyfs_rpc::{Interceptor, Router};
use unifyfs_server::{DelegatorService, Registry};

/// Everything one delegator process needs, built once at startup and
/// threaded through rather than reached for as ambient global state
/// (spec.md §9's "structure as explicit context handles" guidance).
///
/// The Request Manager (C5) is not built here: it belongs to the UnifyFS
/// client library an application process links in alongside the POSIX
/// I/O interposition layer, both explicitly out of scope (spec.md §1).
/// This context is the delegator's own role: servicing inbound reads and
/// fsyncs (C6/C7), and, if this process also hosts a metadata shard,
/// the `ExtentShard` surface (C3/C4).
pub struct DelegatorContext {
    config: Config,
    meta: ExtentKv,
    registry: Arc<Registry>,
}

impl DelegatorContext {
    pub fn build(config: Config) -> anyhow::Result<Self> {
        let endpoints: HashMap<_, _> = config
            .roster
            .iter()
            .map(|(id, addr)| (*id, with_scheme(addr)))
            .collect();
        let router = Router::new(endpoints);
        let interceptor = Interceptor::new(None)?;

        let shard_delegators = config.shard_delegators();
        let meta = ExtentKv::new(router, interceptor, config.meta_range_size, shard_delegators);

        Ok(Self { config, meta, registry: Arc::new(Registry::new()) })
    }

    pub async fn serve(self) -> anyhow::Result<()> {
        let flush = FlushCoordinator::new(self.meta.clone(), self.config.delegator_id);
        let delegator_service = DelegatorService::new(self.registry.clone(), flush);

        let mut server = tonic::transport::Server::builder()
            .add_service(proto_unifyfs::delegator_server::DelegatorServer::new(delegator_service));

        if self.config.hosts_metadata_shard() {
            let store = Arc::new(ShardStore::open(&self.config.meta_db_path, &self.config.meta_db_name)?);
            let extent_shard_service = ExtentShardService::new(store);
            server = server.add_service(proto_unifyfs::extent_shard_server::ExtentShardServer::new(extent_shard_service));
        }

        let shutdown_signal = async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => tracing::info!("caught shutdown signal, stopping delegator..."),
                Err(err) => tracing::error!(?err, "error subscribing to shutdown signal"),
            }
        };

        tracing::info!(listen_addr = %self.config.listen_addr, "delegator listening");
        server
            .serve_with_shutdown(self.config.listen_addr, shutdown_signal)
            .await?;

        tracing::info!("delegator shut down cleanly");
        Ok(())
    }
}

fn with_scheme(addr: &str) -> String {
    if addr.starts_with("http://") || addr.starts_with("https://") {
        addr.to_string()
    } else {
        format!("http://{addr}")
    }
}
