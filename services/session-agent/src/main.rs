//! Expense Tracker Session Agent
//!
//! Long-running process that keeps one user's session alive:
//! 1. Loads the persisted token pair from disk
//! 2. Resolves the session once at startup (refreshing if needed)
//! 3. Refreshes the access token ahead of expiry until the session ends
//! 4. Serves a loopback control API for login, logout and status

mod api;
mod config;
mod error;
mod metrics;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use http_client::ReqwestHttpClient;
use session_auth::{Endpoints, FileTokenStore, SystemClock};
use session_refresh::{Session, SessionEvent};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::api::AppState;
use crate::config::Config;

/// How long in-flight API requests get to finish after a shutdown signal.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    // JSON logs; LOG_LEVEL wins over RUST_LOG
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting session-agent");

    // Before anything can record
    let prometheus_handle = metrics::install_recorder()?;

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
        base_url = %config.backend.base_url,
        store_path = %config.session.store_path.display(),
        listen_addr = %config.agent.listen_addr,
        lead_time_secs = config.session.lead_time_secs,
        "configuration loaded"
    );

    let client = ReqwestHttpClient::new(config.timeout()).context("failed to build HTTP client")?;
    let store = FileTokenStore::load(&config.session.store_path).with_context(|| {
        format!(
            "failed to open token store {}",
            config.session.store_path.display()
        )
    })?;

    let session = Arc::new(Session::new(
        Arc::new(client),
        Arc::new(store),
        Endpoints::new(&config.backend.base_url),
        Arc::new(SystemClock),
        config.refresh_policy(),
    ));

    tokio::spawn(log_events(session.subscribe()));

    match session.resolve().await {
        Ok(status) => {
            info!(status = status.label(), "startup session check finished");
            metrics::set_authenticated(status.is_authenticated());
        }
        // Keep serving: a login through the API may still succeed.
        Err(e) => {
            error!(error = %e, "startup session check failed");
            metrics::set_authenticated(false);
        }
    }

    let app = api::build_router(
        AppState::new(Arc::clone(&session), prometheus_handle),
        config.agent.max_connections,
    );

    let listen_addr = config.agent.listen_addr;
    let listener = TcpListener::bind(listen_addr)
        .await
        .map_err(|source| crate::error::Error::Bind {
            addr: listen_addr,
            source,
        })?;
    info!(addr = %listen_addr, "control API listening");

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
    });

    shutdown_signal().await;

    // Stop refreshing first; the stored pair stays for the next start.
    session.scheduler().cancel();
    let _ = shutdown_tx.send(());

    // The drain timer starts at signal receipt
    match tokio::time::timeout(DRAIN_TIMEOUT, server_handle).await {
        Ok(Ok(Ok(()))) => {
            info!("control API drained");
        }
        Ok(Ok(Err(e))) => {
            error!(error = %e, "server error during shutdown");
        }
        Ok(Err(e)) => {
            error!(error = %e, "server task panicked");
        }
        Err(_) => {
            warn!(
                drain_timeout_secs = DRAIN_TIMEOUT.as_secs(),
                "drain timeout exceeded, forcing shutdown"
            );
        }
    }

    info!("shutdown complete");
    Ok(())
}

/// Log every session event and keep the auth gauge current.
async fn log_events(mut events: broadcast::Receiver<SessionEvent>) {
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "session event log fell behind");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };

        metrics::record_session_event(event.label());
        match event {
            SessionEvent::Refreshed { expires_at_ms } => {
                debug!(?expires_at_ms, "session refreshed");
                metrics::set_authenticated(true);
            }
            SessionEvent::RefreshFailed { error } => {
                warn!(error = %error, kind = error.label(), "session refresh failed, tokens kept");
            }
            SessionEvent::SessionEnded { reason } => {
                warn!(reason = reason.label(), "session ended, re-authentication required");
                metrics::set_authenticated(false);
            }
        }
    }
}

/// Wait for SIGTERM or SIGINT.
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
