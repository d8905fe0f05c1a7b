mod config;
mod logging;
mod transport;

use cache_storage_core::SessionEngines;
use clap::Parser;
use config::{Args, ServerConfig};
use std::sync::Arc;
use tokio::io::BufReader;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = ServerConfig::load(&args)?;
    logging::init(config.log_format)?;

    tracing::info!(
        quota_bytes = config.engine.quota_bytes,
        log_requests = config.broker.log_requests,
        "cache storage server starting"
    );

    let engines = Arc::new(SessionEngines::memory(config.engine.clone()));
    let stdin = BufReader::new(tokio::io::stdin());
    transport::serve(stdin, tokio::io::stdout(), engines, config.broker).await?;

    tracing::info!("cache storage server stopped");
    Ok(())
}
