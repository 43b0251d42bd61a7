//! Starsiege Host
//!
//! Runs a dedicated host until interrupted.

use tracing::info;
use tracing_subscriber::EnvFilter;

use starsiege::{GameHost, HostConfig, VERSION};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = HostConfig::from_env()?;
    info!("Starsiege host v{}", VERSION);
    info!(
        stars = config.galaxy.star_count,
        seed = config.galaxy.seed,
        max_clients = config.max_clients,
        "Configuration loaded"
    );

    let host = GameHost::start(config).await?;
    info!("Listening on {}", host.local_addr());

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");
    host.shutdown().await;
    Ok(())
}
