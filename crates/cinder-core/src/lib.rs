//! Cinder Core - control plane for ephemeral training jobs.
//!
//! This crate provides:
//! - Job tracking and lifecycle orchestration over a pluggable resource provider
//! - Docker and Azure Container Instances provider adapters
//! - HTTP API server with an optional background reconciler
//! - Configuration management
//!
//! # Example
//!
//! ```rust,no_run
//! use cinder_core::{config::Config, server};
//!
//! #[tokio::main]
//! async fn main() -> cinder_core::error::Result<()> {
//!     let config = Config::load()?;
//!     server::run(&config).await
//! }
//! ```

pub mod config;
pub mod error;
pub mod jobs;
pub mod provider;
pub mod server;

pub use config::Config;
pub use error::{CoreError, Result};
pub use jobs::{JobOrchestrator, JobStatus, JobView, OrchestratorError};
pub use provider::{ProviderError, ProviderFactory, ResourceProvider};
