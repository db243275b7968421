//! Silo maintenance daemon.

use anyhow::{Context, Result};
use clap::Parser;
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use silo_core::MaintenanceConfig;
use silo_maintenance::Maintenance;
use silo_store::{ChunkStore, IndexStore, LocalChunkStore, LocalIndexStore};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// silod - local cache maintenance for the silo binary cache proxy
#[derive(Parser, Debug)]
#[command(name = "silod")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, env = "SILO_CONFIG", default_value = "config/silod.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("silod v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration (file is optional, env vars can provide/override
    // everything)
    let config_path = std::path::Path::new(&args.config);
    let mut figment = Figment::new();
    if config_path.exists() {
        tracing::info!(config_path = %args.config, "Loading configuration from file");
        figment = figment.merge(Toml::file(&args.config));
    } else {
        tracing::debug!("No config file found at {}", args.config);
    }

    let config: MaintenanceConfig = figment
        .merge(Env::prefixed("SILO_").split("__"))
        .extract()
        .context("failed to load configuration")?;
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid configuration: {e}"))?;

    silo_maintenance::metrics::register_metrics();
    tracing::info!("Prometheus metrics registered");

    let chunk_store: Arc<dyn ChunkStore> = Arc::new(
        LocalChunkStore::new(&config.chunk_store)
            .await
            .context("failed to open chunk store")?,
    );
    let index_store: Arc<dyn IndexStore> = Arc::new(
        LocalIndexStore::new(&config.index_store)
            .await
            .context("failed to open index store")?,
    );
    tracing::info!(
        chunk_store = %config.chunk_store.display(),
        index_store = %config.index_store.display(),
        cache_size_gib = config.cache_size_gib,
        "Stores opened"
    );

    let maintenance = Maintenance::new(chunk_store, index_store, config);
    let (gc, verify) = maintenance.spawn();

    // The loops run until the process exits.
    let _ = tokio::try_join!(gc, verify);

    Ok(())
}
