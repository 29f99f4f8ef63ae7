//! Cinder Core Server - Entry Point
//!
//! This binary starts the Cinder HTTP API.

use tracing::error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use cinder_core::{config::Config, server};

/// Set to `json` for one JSON object per log line.
const LOG_FORMAT_ENV: &str = "CINDER_LOG_FORMAT";

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "cinder_core=debug,info".into());
    let json = std::env::var(LOG_FORMAT_ENV).is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() {
    init_tracing();

    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Failed to load configuration");
            std::process::exit(1);
        }
    };

    if let Err(e) = server::run(&config).await {
        error!(error = %e, "Server error");
        std::process::exit(1);
    }
}
