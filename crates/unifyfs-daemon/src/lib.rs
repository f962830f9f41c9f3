//! The delegator binary (ambient component A4): wires `unifyfs-config`,
//! `unifyfs-rpc`, `unifyfs-meta`, `unifyfs-client`, and `unifyfs-server`
//! into one running process, following
//! `data-plane-controller::main`'s CLI-parse -> tracing-init ->
//! tokio-runtime -> signal-aware serve shape.

mod context;

pub use context::DelegatorContext;

/// Load configuration and serve until the process is asked to stop.
pub async fn run(args: unifyfs_config::Args) -> anyhow::Result<()> {
    let config = unifyfs_config::Config::load(&args)?;
    tracing::info!(
        delegator_id = config.delegator_id,
        listen_addr = %config.listen_addr,
        hosts_metadata_shard = config.hosts_metadata_shard(),
        "delegator starting"
    );

    DelegatorContext::build(config)?.serve().await
}
