pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::TcpListener;

use crate::config::Config;
use crate::oci::OciStorage;
use crate::serve::state::AppState;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Bind the configured address and serve the registry until SIGINT/SIGTERM.
///
/// A background task sweeps expired upload sessions and reclaims their
/// scratch objects, so abandoned uploads do not accumulate on disk.
pub async fn run_server(config: Config, registry: Arc<OciStorage>) -> Result<()> {
    let request_deadline = config.server.read_timeout() + config.server.write_timeout();
    let state = AppState::new(registry.clone(), request_deadline);
    let router = routes::build_router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(address = %addr, "registry listening");

    let sweep_interval = config.registry.upload_sweep_interval();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(sweep_interval);
        interval.tick().await;
        loop {
            interval.tick().await;
            let removed = registry.sweep_expired_uploads().await;
            if removed > 0 {
                tracing::info!(removed, "reclaimed expired upload sessions");
            }
        }
    });

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    tracing::info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            tracing::warn!(%error, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(error) => {
                tracing::warn!(%error, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    tracing::info!("shutdown signal received, draining in-flight requests");

    // Bound the drain: anything still running after the grace period is cut off.
    tokio::spawn(async {
        tokio::time::sleep(SHUTDOWN_GRACE).await;
        tracing::warn!("drain deadline exceeded, exiting");
        std::process::exit(0);
    });
}
