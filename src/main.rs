use std::sync::Arc;

use anyhow::{bail, Result};
use cargohold::cli::{Cli, Commands};
use cargohold::config::Config;
use cargohold::oci::OciStorage;
use cargohold::serve;
use cargohold::storage::{BlobStore, LocalStore};
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Serve {
            config,
            host,
            port,
            base_dir,
        } => {
            let mut config = Config::load(config.as_deref())?;
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(base_dir) = base_dir {
                config.storage.base_dir = base_dir.to_string_lossy().into_owned();
            }
            run(config).await
        }
    }
}

async fn run(config: Config) -> Result<()> {
    let store: Arc<dyn BlobStore> = match config.storage.kind.as_str() {
        "local" => {
            let store = LocalStore::new(&config.storage.base_dir).await?;
            tracing::info!(base_dir = %config.storage.base_dir, "local storage initialized");
            Arc::new(store)
        }
        other => bail!("unsupported storage type {other:?}; only \"local\" is built in"),
    };

    let registry = Arc::new(OciStorage::new(
        store,
        config.registry.upload_session_timeout(),
    ));

    serve::run_server(config, registry).await
}
