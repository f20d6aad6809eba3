//! Fortum consumption poller
//!
//! Single-binary service that:
//! 1. Logs in to the Fortum portal and looks up the customer
//! 2. Fetches total consumption once, retrying while the session propagates
//! 3. Polls on a fixed interval, keeping the session renewed in the background
//! 4. Serves the derived energy and cost totals on /health and /metrics

mod config;
mod error;
mod metrics;
mod poller;
mod service;

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use fortum_api::DataClient;
use fortum_auth::{Authenticator, LoginCredentials};
use metrics_exporter_prometheus::PrometheusHandle;
use provider::ReqwestClientFactory;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::error::Error as ServiceError;
use crate::poller::SharedStatus;
use crate::service::{DRAIN_TIMEOUT, ServiceAction, ServiceEvent, ServiceState, handle_event};

/// Shared application state accessible from all handlers
#[derive(Clone)]
struct AppState {
    status: SharedStatus,
    auth: Arc<Authenticator>,
    customer_id: String,
    started_at: Instant,
    prometheus: PrometheusHandle,
}

fn build_router(state: AppState, max_connections: usize) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    // JSON logs, filtered by LOG_LEVEL, then RUST_LOG
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting fortum-poller");

    // Install before any library emits metrics
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
    let password = config.password().context("no password configured")?;

    info!(
        username = %config.fortum.username,
        password = %password.preview(2),
        flow = ?config.auth.flow,
        interval_secs = config.poller.interval_secs,
        listen_addr = %config.poller.listen_addr,
        "configuration loaded"
    );

    let factory = ReqwestClientFactory::new(config.poller.timeout());
    let auth = Authenticator::builder(LoginCredentials::new(
        config.fortum.username.clone(),
        password.expose().clone(),
    ))
    .config(config.auth.clone())
    .factory(Arc::new(factory.clone()))
    .build()
    .context("invalid authentication settings")?;
    let client = Arc::new(
        DataClient::new(auth.clone(), &factory, config.api.clone())
            .context("failed to build data client")?,
    );
    let status = SharedStatus::default();

    // --- Setup: authenticate, then first fetch ---
    let (mut state, mut action) = handle_event(ServiceState::Initializing, ServiceEvent::ConfigLoaded);
    loop {
        let event = match action {
            ServiceAction::Authenticate => match setup_session(&client).await {
                Ok(customer_id) => {
                    info!(customer_id = %customer_id, "authenticated");
                    ServiceEvent::Authenticated { customer_id }
                }
                Err(e) => {
                    let failure = ServiceError::setup(&e);
                    error!(error = %failure, "setup failed");
                    ServiceEvent::AuthFailed(failure)
                }
            },
            ServiceAction::FetchInitial => match poller::update(&client, &status).await {
                Ok(_) => ServiceEvent::FetchSucceeded,
                Err(e) => ServiceEvent::FetchFailed {
                    session_expired: e.is_session_expired(),
                    error: ServiceError::update(&e),
                },
            },
            ServiceAction::ScheduleRetry { delay } => {
                warn!(
                    retry_in_secs = delay.as_secs(),
                    "first update failed, session may still be propagating"
                );
                tokio::time::sleep(delay).await;
                ServiceEvent::RetryTimer
            }
            ServiceAction::StartPolling => break,
            ServiceAction::Shutdown { exit_code } => {
                auth.shutdown().await;
                if exit_code == 0 {
                    return Ok(());
                }
                anyhow::bail!("setup failed in state {state:?}");
            }
            ServiceAction::None => anyhow::bail!("setup stalled in state {state:?}"),
        };

        let (next_state, next_action) = handle_event(state, event);
        state = next_state;
        action = next_action;
    }

    let customer_id = match state {
        ServiceState::Running { customer_id } => customer_id,
        other => anyhow::bail!("unexpected state after setup: {other:?}"),
    };
    info!(customer_id = %customer_id, "state: Running");

    let cancel = CancellationToken::new();
    let poller_handle = poller::spawn_poller(
        client.clone(),
        status.clone(),
        config.poller.interval(),
        cancel.clone(),
    );

    let app = build_router(
        AppState {
            status,
            auth: auth.clone(),
            customer_id,
            started_at: Instant::now(),
            prometheus: prometheus_handle,
        },
        config.poller.max_connections,
    );

    let listen_addr = config.poller.listen_addr;
    let listener = TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind to {listen_addr}"))?;
    info!(addr = %listen_addr, "serving /health and /metrics");

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
    cancel.cancel();
    if let Err(e) = poller_handle.await {
        error!(error = %e, "poller task panicked");
    }

    match tokio::time::timeout(DRAIN_TIMEOUT, server_handle).await {
        Ok(Ok(Ok(()))) => info!("HTTP listener drained"),
        Ok(Ok(Err(e))) => error!(error = %e, "server error during shutdown"),
        Ok(Err(e)) => error!(error = %e, "server task panicked"),
        Err(_) => warn!(
            drain_timeout_secs = DRAIN_TIMEOUT.as_secs(),
            "drain timeout exceeded, forcing shutdown"
        ),
    }

    auth.shutdown().await;
    info!("shutdown complete");
    Ok(())
}

/// Initial login followed by the customer lookup.
async fn setup_session(client: &DataClient) -> fortum_api::Result<String> {
    client.authenticator().authenticate().await?;
    client.customer_id().await
}

/// Returns 200 when the last update succeeded, 503 otherwise.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let status = state.status.read().await;
    let session = state.auth.snapshot().await;
    let expires_in = state.auth.time_until_expiry().await.map(|d| d.as_secs());

    let (status_code, label) = if status.is_healthy() {
        (axum::http::StatusCode::OK, "healthy")
    } else {
        (axum::http::StatusCode::SERVICE_UNAVAILABLE, "degraded")
    };
    let body = serde_json::json!({
        "status": label,
        "customer_id": state.customer_id,
        "uptime_seconds": state.started_at.elapsed().as_secs(),
        "readings": status.last_readings,
        "last_error": status.last_error,
        "consecutive_failures": status.consecutive_failures,
        "session": {
            "generation": session.generation,
            "session_based": session.session_based,
            "expires_in_seconds": expires_in,
        },
    });

    (
        status_code,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
}

/// Prometheus metrics in text exposition format.
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
