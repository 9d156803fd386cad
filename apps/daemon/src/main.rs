//! chunkdrop daemon entry point.

mod app;
mod config;
mod convert;
mod handler;
mod handlers;

use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        "starting chunkdrop daemon"
    );

    let config = config::Config::load()?;
    tracing::info!(
        name = %config.name,
        data_dir = %config.data_dir.display(),
        tokens = config.tokens.len(),
        "configuration loaded"
    );
    if config.tokens.is_empty() {
        tracing::warn!("no tokens configured, every hello will be rejected");
    }

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(app::run(config))?;

    tracing::info!("daemon shut down cleanly");
    Ok(())
}
