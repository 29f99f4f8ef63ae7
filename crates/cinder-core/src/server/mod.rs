//! Server module for Cinder Core.
//!
//! HTTP API over the job orchestrator, plus the optional background reconciler.

pub mod auth;
pub mod errors;
pub mod logging;
pub mod reconciler;
pub mod routes;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::routing::{delete, get, post};
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::timeout::TimeoutLayer;
use tracing::{info, warn};

use crate::config::{Config, ProviderKind};
use crate::error::Result;
use crate::jobs::JobOrchestrator;
use crate::provider::{DockerProvider, ProviderFactory, ResourceProvider};
use auth::{require_api_key, AuthConfig};
use logging::RequestLoggerLayer;
use reconciler::Reconciler;
use routes::AppState;

/// Builds the API router.
///
/// `/health` is public; everything under `/api` goes through the key check.
/// With `public_url` set, submit responses carry a `status_url` under it.
pub fn router(
    orchestrator: Arc<JobOrchestrator>,
    auth: AuthConfig,
    request_timeout: Duration,
    public_url: Option<&str>,
) -> Router {
    let state = AppState { orchestrator, public_url: public_url.map(Arc::from) };

    let api = Router::new()
        .route("/api/train", post(routes::submit))
        .route("/api/status/:job_id", get(routes::status))
        .route("/api/logs/:job_id", get(routes::logs))
        .route("/api/cleanup/:job_id", delete(routes::cleanup))
        .route("/api/jobs", get(routes::list))
        .layer(axum::middleware::from_fn_with_state(auth, require_api_key));

    Router::new()
        .route("/health", get(routes::health))
        .merge(api)
        .with_state(state)
        .layer(TimeoutLayer::new(request_timeout))
        .layer(RequestLoggerLayer)
}

/// Start the Cinder HTTP server and run until Ctrl-C.
///
/// # Errors
///
/// Returns an error if the provider cannot be built or the address cannot be bound.
pub async fn run(config: &Config) -> Result<()> {
    let provider = ProviderFactory::create(&config.provider)?;

    if config.provider.kind == ProviderKind::Docker {
        match DockerProvider::new(config.provider.docker.clone()).version().await {
            Ok(version) => info!(version = %version, "Docker CLI available"),
            Err(e) => warn!(error = %e, "Docker CLI check failed; submissions will fail until it is available"),
        }
    }

    let listener = TcpListener::bind(config.server.address).await?;
    run_with(config, provider, listener, shutdown_signal()).await
}

/// Serve on an already bound listener with the given provider until `shutdown` completes.
pub async fn run_with<F>(
    config: &Config,
    provider: Arc<dyn ResourceProvider>,
    listener: TcpListener,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let orchestrator = Arc::new(JobOrchestrator::from_config(provider, config));

    let auth = AuthConfig::new(config.server.api_key.as_deref());
    if !auth.enabled() {
        warn!("No server.api_key configured; the API is unauthenticated");
    }

    let (stop_tx, stop_rx) = watch::channel(());
    let reconciler = config.reconciler.enabled.then(|| {
        Reconciler::new(Arc::clone(&orchestrator), config.reconciler.clone()).spawn(stop_rx)
    });

    let app = router(
        Arc::clone(&orchestrator),
        auth,
        Duration::from_secs(config.server.request_timeout_secs),
        config.server.public_url.as_deref(),
    );

    let local_addr = listener.local_addr()?;
    info!(
        address = %local_addr,
        public_url = config.server.public_url.as_deref().unwrap_or(""),
        provider = orchestrator.provider_kind(),
        "Starting HTTP server"
    );

    let served = axum::serve(listener, app).with_graceful_shutdown(shutdown).await;

    // Stop the reconciler even if serving failed
    drop(stop_tx);
    if let Some(task) = reconciler {
        if let Err(e) = task.await {
            warn!(error = %e, "Reconciler task ended abnormally");
        }
    }

    served?;
    let jobs = orchestrator.job_count().await;
    info!(jobs, "Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl-C; shutting down");
        return;
    }
    info!("Shutdown signal received");
}
