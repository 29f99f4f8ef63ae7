//! Configuration module for Cinder Core.
//!
//! Settings are layered: built-in defaults, then an optional TOML file, then
//! `CINDER_`-prefixed environment variables using `__` for nesting
//! (`CINDER_SERVER__API_KEY`, `CINDER_PROVIDER__ACI__RESOURCE_GROUP`).

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use cinder_training::{TrainingDefaults, WorkerLayout};
use serde::Deserialize;

use crate::error::{CoreError, Result};
use crate::provider::GpuRequest;

/// Environment variable naming an explicit config file.
pub const CONFIG_PATH_ENV: &str = "CINDER_CONFIG";
/// File read from the working directory when `CINDER_CONFIG` is unset.
pub const DEFAULT_CONFIG_FILE: &str = "cinder.toml";

const ENV_PREFIX: &str = "CINDER";

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// The address to bind the HTTP server to.
    #[serde(default = "default_address")]
    pub address: SocketAddr,
    /// Shared credential for the API. Unset means unauthenticated.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Externally reachable base URL; submit responses link to job status under it.
    #[serde(default)]
    pub public_url: Option<String>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_address() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            api_key: None,
            public_url: None,
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// Which compute platform runs the workers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    Docker,
    Aci,
}

/// Local Docker settings.
///
/// The three directories are bind-mounted into each worker and should be absolute.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct DockerConfig {
    #[serde(default = "default_docker_binary")]
    pub binary: String,
    #[serde(default = "default_datasets_dir")]
    pub datasets_dir: String,
    #[serde(default = "default_models_dir")]
    pub models_dir: String,
    #[serde(default = "default_outputs_dir")]
    pub outputs_dir: String,
}

fn default_docker_binary() -> String {
    "docker".to_string()
}

fn default_datasets_dir() -> String {
    "/var/lib/cinder/datasets".to_string()
}

fn default_models_dir() -> String {
    "/var/lib/cinder/models".to_string()
}

fn default_outputs_dir() -> String {
    "/var/lib/cinder/outputs".to_string()
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            binary: default_docker_binary(),
            datasets_dir: default_datasets_dir(),
            models_dir: default_models_dir(),
            outputs_dir: default_outputs_dir(),
        }
    }
}

/// Credential for a private image registry.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct RegistryCredential {
    pub server: String,
    pub username: String,
    pub password: String,
}

/// Azure Container Instances settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AciConfig {
    pub subscription_id: String,
    pub resource_group: String,
    pub location: String,
    pub management_url: String,
    pub authority_url: String,
    pub api_version: String,
    pub tenant_id: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    /// Pre-issued bearer token; takes precedence over client credentials.
    pub access_token: Option<String>,
    pub storage_account_name: String,
    pub storage_account_key: String,
    pub dataset_share: String,
    pub model_share: String,
    pub output_share: String,
    /// Command prefix; the worker arguments are appended to it.
    pub entrypoint: Vec<String>,
    pub registry: Option<RegistryCredential>,
}

impl Default for AciConfig {
    fn default() -> Self {
        Self {
            subscription_id: String::new(),
            resource_group: String::new(),
            location: "eastus".to_string(),
            management_url: "https://management.azure.com".to_string(),
            authority_url: "https://login.microsoftonline.com".to_string(),
            api_version: "2023-05-01".to_string(),
            tenant_id: None,
            client_id: None,
            client_secret: None,
            access_token: None,
            storage_account_name: String::new(),
            storage_account_key: String::new(),
            dataset_share: "datasets".to_string(),
            model_share: "models".to_string(),
            output_share: "outputs".to_string(),
            entrypoint: vec!["python".to_string(), "app.py".to_string()],
            registry: None,
        }
    }
}

/// Provider selection and per-unit resources.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    #[serde(default)]
    pub kind: ProviderKind,
    #[serde(default = "default_image")]
    pub image: String,
    #[serde(default = "default_cpu")]
    pub cpu: f64,
    #[serde(default = "default_memory_gb")]
    pub memory_gb: f64,
    #[serde(default)]
    pub gpu: Option<GpuRequest>,
    #[serde(default)]
    pub layout: WorkerLayout,
    #[serde(default)]
    pub docker: DockerConfig,
    #[serde(default)]
    pub aci: Option<AciConfig>,
}

fn default_image() -> String {
    "cinder-trainer:latest".to_string()
}

fn default_cpu() -> f64 {
    4.0
}

fn default_memory_gb() -> f64 {
    16.0
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: ProviderKind::default(),
            image: default_image(),
            cpu: default_cpu(),
            memory_gb: default_memory_gb(),
            gpu: None,
            layout: WorkerLayout::default(),
            docker: DockerConfig::default(),
            aci: None,
        }
    }
}

/// Background status refresh.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ReconcilerConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Release units of jobs that reached `completed` or `failed`.
    #[serde(default)]
    pub release_terminal: bool,
}

fn default_interval_secs() -> u64 {
    30
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self { enabled: false, interval_secs: default_interval_secs(), release_terminal: false }
    }
}

/// Root configuration for Cinder.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub training: TrainingDefaults,
    #[serde(default)]
    pub reconciler: ReconcilerConfig,
}

impl Config {
    /// Create a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from the config file and the process environment.
    ///
    /// Reads `CINDER_CONFIG` when set (the file must then exist), otherwise
    /// `./cinder.toml` if present.
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be read or the result is invalid.
    pub fn load() -> Result<Self> {
        let (path, required) = match std::env::var_os(CONFIG_PATH_ENV) {
            Some(path) => (PathBuf::from(path), true),
            None => (PathBuf::from(DEFAULT_CONFIG_FILE), false),
        };
        if !required && !path.exists() {
            return Self::load_from(None, None);
        }
        Self::load_from(Some(&path), None)
    }

    /// Load configuration from an optional file and an environment map.
    ///
    /// `env` replaces the process environment when given; keys carry the
    /// `CINDER_` prefix as they would in the real environment.
    pub fn load_from(file: Option<&Path>, env: Option<HashMap<String, String>>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = file {
            let name = path
                .to_str()
                .ok_or_else(|| CoreError::InvalidConfig(format!("non UTF-8 config path: {}", path.display())))?;
            builder = builder.add_source(config::File::new(name, config::FileFormat::Toml).required(true));
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .source(env.map(|vars| vars.into_iter().collect())),
        );

        let config: Self = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a TOML document, without environment overrides.
    pub fn from_toml_str(toml: &str) -> Result<Self> {
        let config: Self = config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that cannot produce a working service.
    pub fn validate(&self) -> Result<()> {
        let provider = &self.provider;
        if provider.image.trim().is_empty() {
            return Err(CoreError::InvalidConfig("provider.image must not be empty".to_string()));
        }
        if provider.cpu.is_nan() || provider.cpu <= 0.0 {
            return Err(CoreError::InvalidConfig(format!("provider.cpu must be positive, got {}", provider.cpu)));
        }
        if provider.memory_gb.is_nan() || provider.memory_gb <= 0.0 {
            return Err(CoreError::InvalidConfig(format!(
                "provider.memory_gb must be positive, got {}",
                provider.memory_gb
            )));
        }
        if provider.gpu.as_ref().is_some_and(|gpu| gpu.count == 0) {
            return Err(CoreError::InvalidConfig("provider.gpu.count must be at least 1".to_string()));
        }

        if provider.kind == ProviderKind::Aci {
            let Some(ref aci) = provider.aci else {
                return Err(CoreError::InvalidConfig(
                    "provider.kind is \"aci\" but no [provider.aci] section is configured".to_string(),
                ));
            };
            for (field, value) in [
                ("subscription_id", &aci.subscription_id),
                ("resource_group", &aci.resource_group),
                ("storage_account_name", &aci.storage_account_name),
                ("storage_account_key", &aci.storage_account_key),
            ] {
                if value.trim().is_empty() {
                    return Err(CoreError::InvalidConfig(format!("provider.aci.{} is required", field)));
                }
            }
        }

        if self.reconciler.enabled && self.reconciler.interval_secs == 0 {
            return Err(CoreError::InvalidConfig("reconciler.interval_secs must be at least 1".to_string()));
        }
        if self.server.request_timeout_secs == 0 {
            return Err(CoreError::InvalidConfig("server.request_timeout_secs must be at least 1".to_string()));
        }

        self.training
            .hyperparams()
            .validate()
            .map_err(|e| CoreError::InvalidConfig(format!("training defaults: {}", e)))?;
        Ok(())
    }
}
