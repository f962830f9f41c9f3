use clap::Parser;
use tracing_subscriber::prelude::*;

fn main() -> Result<(), anyhow::Error> {
    // Structured JSON logs to stderr, per ops::tracing's own usage example.
    let env_filter = tracing_subscriber::EnvFilter::from_default_env();
    tracing_subscriber::registry()
        .with(ops::tracing::Layer::new(ops::stderr_log_handler, std::time::SystemTime::now).with_filter(env_filter))
        .init();

    let args = unifyfs_config::Args::parse();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    let result = runtime.block_on(runtime.spawn(async move { unifyfs_daemon::run(args).await }));

    runtime.shutdown_timeout(std::time::Duration::from_secs(5));
    result?
}
