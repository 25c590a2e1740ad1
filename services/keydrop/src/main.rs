//! keydrop: license key inventory service
//!
//! Single-binary Rust service that:
//! 1. Loads configuration and picks the store backend once (repository when a
//!    GitHub token is configured, local files otherwise)
//! 2. Serves the admin API used by the payment handler and operators
//! 3. Exposes health and Prometheus metrics

mod admin;
mod config;
mod error;
mod metrics;

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use key_pool::{KeyStore, LocalKeyStore, RemoteKeyStore};
use metrics_exporter_prometheus::PrometheusHandle;
use repo_contents::ContentsClient;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::admin::{AdminState, build_admin_router};
use crate::config::Config;

/// Time allowed for in-flight requests to finish after a shutdown signal.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Shared state for the health and metrics handlers
#[derive(Clone)]
struct AppState {
    admin: AdminState,
    prometheus: PrometheusHandle,
    started_at: Instant,
}

/// Build the full router: health, metrics and the admin API.
///
/// `max_connections` caps concurrent in-flight requests.
fn build_router(state: AppState, max_connections: usize) -> Router {
    let admin = build_admin_router(state.admin.clone());
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
        .merge(admin)
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
}

/// Choose the backend for the process lifetime.
fn build_store(config: &Config) -> Result<Arc<dyn KeyStore>> {
    let layout = config.layout();
    let periods = config.store.periods.clone();

    match config.remote() {
        Some(repo) => {
            let http = reqwest::Client::builder()
                .timeout(repo.timeout)
                .build()
                .context("failed to build HTTP client")?;
            info!(
                owner = %repo.owner,
                repo = %repo.repo,
                branch = repo.branch.as_deref().unwrap_or("(default)"),
                "using repository key store"
            );
            let client = ContentsClient::new(http, repo, config.retry_policy());
            Ok(Arc::new(RemoteKeyStore::new(client, layout, periods)))
        }
        None => {
            if config.github.owner.is_some() || config.github.repo.is_some() {
                warn!("repository configured but no GitHub token found, using local files");
            }
            info!(
                root = %config.store.local_root.display(),
                "using local key store"
            );
            Ok(Arc::new(LocalKeyStore::new(
                config.store.local_root.clone(),
                layout,
                periods,
            )))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // JSON logs, filter from LOG_LEVEL then RUST_LOG
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting keydrop");

    let prometheus_handle =
        metrics::install_recorder().context("failed to install Prometheus recorder")?;

    // CLI: simple --config flag parsing
    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let config_path = Config::resolve_path(cli_config_path);
    let config = if config_path.exists() {
        info!(path = %config_path.display(), "loading configuration");
        Config::load(&config_path)
            .with_context(|| format!("failed to load config from {}", config_path.display()))?
    } else if cli_config_path.is_some() {
        anyhow::bail!("config file {} does not exist", config_path.display());
    } else {
        info!(path = %config_path.display(), "no config file, using defaults");
        Config::parse("").context("failed to build default configuration")?
    };

    info!(
        listen_addr = %config.admin.listen_addr,
        keys_dir = %config.store.keys_dir,
        periods = config.store.periods.len(),
        "configuration loaded"
    );

    let store = build_store(&config)?;

    let app_state = AppState {
        admin: AdminState::new(store),
        prometheus: prometheus_handle,
        started_at: Instant::now(),
    };
    let app = build_router(app_state, config.admin.max_connections);

    let listen_addr = config.admin.listen_addr;
    let listener = TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind to {listen_addr}"))?;
    info!(addr = %listen_addr, "accepting requests");

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

    // The drain timer starts at signal receipt
    match tokio::time::timeout(DRAIN_TIMEOUT, server_handle).await {
        Ok(Ok(Ok(()))) => info!("all in-flight requests drained"),
        Ok(Ok(Err(e))) => error!(error = %e, "server error during shutdown"),
        Ok(Err(e)) => error!(error = %e, "server task panicked"),
        Err(_) => warn!(
            drain_timeout_secs = DRAIN_TIMEOUT.as_secs(),
            "drain timeout exceeded, forcing shutdown"
        ),
    }

    info!("shutdown complete");
    Ok(())
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        axum::http::StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        serde_json::json!({
            "status": "ok",
            "backend": state.admin.backend(),
            "uptime_seconds": state.started_at.elapsed().as_secs(),
        })
        .to_string(),
    )
}

/// GET /metrics, Prometheus text exposition format.
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        axum::http::StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.prometheus.render(),
    )
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
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
