//! AlgoDao Architect
//!
//! HTTP backend for the MQL5 trading-strategy architect:
//! 1. Loads config and the persisted key/history store
//! 2. Builds a rotating Gemini client over the user's keys plus the
//!    environment fallback key
//! 3. Serves the analysis, consultation, specification, code, repair and
//!    simulation endpoints

mod architect;
mod config;
mod error;
mod metrics;
mod prompts;
mod routes;

use anyhow::{Context, Result};
use completion::gemini::GeminiClient;
use key_pool::{CredentialPool, RotatingClient};
use key_store::{HistoryStore, KeyStore, KvStore};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::architect::Architect;
use crate::config::Config;
use crate::routes::{AppState, ServiceMetrics, build_router};

/// How long in-flight requests may drain after a shutdown signal.
///
/// Code generation can think for minutes; anything still running after this
/// is abandoned.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    // JSON logs, LOG_LEVEL then RUST_LOG
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting algodao-architect");

    // Install before any metric is emitted
    let prometheus_handle =
        metrics::install_recorder().context("failed to install Prometheus recorder")?;

    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let config_path = Config::resolve_path(cli_config_path);
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        listen_addr = %config.server.listen_addr,
        base_url = %config.gemini.base_url,
        fallback_key = config.gemini.api_key.is_some(),
        "configuration loaded"
    );

    let store = Arc::new(
        KvStore::load(config.storage.path.clone())
            .await
            .with_context(|| format!("failed to open store {}", config.storage.path.display()))?,
    );
    info!(path = %store.path().display(), "store opened");

    let pool = Arc::new(
        CredentialPool::from_store(KeyStore::new(store.clone()), config.gemini.api_key.clone())
            .await,
    );
    if !pool.has_any().await {
        warn!("no API keys configured; model operations will fail until keys are saved");
    }

    let http = reqwest::Client::builder()
        .build()
        .context("failed to build HTTP client")?;
    let gemini = GeminiClient::new(
        http,
        config.gemini.base_url.clone(),
        Duration::from_secs(config.gemini.timeout_secs),
    );

    let architect = Arc::new(Architect::new(
        RotatingClient::new(pool.clone()),
        Arc::new(gemini),
        store.clone(),
    ));

    let metrics = ServiceMetrics::new();
    let app_state = AppState {
        architect,
        pool,
        history: HistoryStore::new(store.clone()),
        store,
        metrics: metrics.clone(),
        prometheus: prometheus_handle,
    };

    let app = build_router(app_state, config.server.max_connections);

    let listen_addr = config.server.listen_addr;
    let listener = TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind to {listen_addr}"))?;
    info!(addr = %listen_addr, "accepting requests");

    // The drain timer starts at signal receipt, not at server start
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
    });

    shutdown_signal().await;
    let _ = shutdown_tx.send(());

    match tokio::time::timeout(DRAIN_TIMEOUT, server_handle).await {
        Ok(Ok(Ok(()))) => {
            info!("all in-flight requests drained");
        }
        Ok(Ok(Err(e))) => {
            error!(error = %e, "server error during shutdown");
        }
        Ok(Err(e)) => {
            error!(error = %e, "server task panicked");
        }
        Err(_) => {
            warn!(
                requests_served = metrics.requests_total.load(Ordering::Relaxed),
                drain_timeout_secs = DRAIN_TIMEOUT.as_secs(),
                "drain timeout exceeded, forcing shutdown"
            );
        }
    }

    info!("shutdown complete");
    Ok(())
}

/// Wait for SIGTERM or SIGINT.
///
/// A handler that cannot be installed is logged and never fires.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
