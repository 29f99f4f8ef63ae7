//! Shared test utilities for Cinder Core integration tests.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use cinder_core::config::{Config, ProviderConfig};
use cinder_core::jobs::{JobOrchestrator, UnitTemplate};
use cinder_core::provider::InMemoryProvider;
use cinder_core::server::{self, auth::AuthConfig};
use cinder_training::TrainingDefaults;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

/// Creates an orchestrator backed by a fresh in-memory provider.
pub fn orchestrator() -> (Arc<InMemoryProvider>, Arc<JobOrchestrator>) {
    let provider = Arc::new(InMemoryProvider::new());
    let orchestrator = Arc::new(JobOrchestrator::new(
        provider.clone(),
        UnitTemplate::from_config(&ProviderConfig::default()),
        TrainingDefaults::default(),
    ));
    (provider, orchestrator)
}

/// Builds the API router over an in-memory provider.
pub fn test_router(api_key: Option<&str>) -> (Arc<InMemoryProvider>, Router) {
    test_router_with_public_url(api_key, None)
}

/// Builds the API router with a public base URL for `status_url`.
pub fn test_router_with_public_url(api_key: Option<&str>, public_url: Option<&str>) -> (Arc<InMemoryProvider>, Router) {
    let (provider, orchestrator) = orchestrator();
    let router = server::router(orchestrator, AuthConfig::new(api_key), Duration::from_secs(5), public_url);
    (provider, router)
}

/// A server running on an ephemeral port.
pub struct TestServer {
    pub addr: SocketAddr,
    pub provider: Arc<InMemoryProvider>,
    shutdown: Option<oneshot::Sender<()>>,
    task: tokio::task::JoinHandle<()>,
}

impl TestServer {
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Triggers graceful shutdown and waits for the server to exit.
    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        tokio::time::timeout(Duration::from_secs(5), &mut self.task)
            .await
            .expect("Server did not shut down")
            .expect("Server task panicked");
    }
}

/// Starts the full server (config, auth, reconciler) on 127.0.0.1:0.
///
/// # Panics
/// Panics if the listener cannot be bound.
pub async fn start_test_server(config: Config) -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("Failed to bind to port 0");
    let addr = listener.local_addr().unwrap();
    let provider = Arc::new(InMemoryProvider::new());
    let (tx, rx) = oneshot::channel::<()>();

    let server_provider = provider.clone();
    let task = tokio::spawn(async move {
        server::run_with(&config, server_provider, listener, async {
            let _ = rx.await;
        })
        .await
        .expect("Server failed to run");
    });

    TestServer { addr, provider, shutdown: Some(tx), task }
}

/// Reads a response body as JSON.
pub async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}
