//! Provider-neutral description of a compute unit and of its observed state.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Identifier returned by a provider for an allocated compute unit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProviderHandle(pub String);

impl ProviderHandle {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ProviderHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// A volume made visible inside the unit.
///
/// `name` is logical (`datasets`, `models`, `outputs`); each provider resolves it
/// to a host directory or file share from its own configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeMount {
    pub name: String,
    /// Path inside the container.
    pub mount_path: String,
    pub read_only: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GpuRequest {
    pub count: u32,
    /// Provider SKU, e.g. `K80` or `V100`. Ignored by Docker.
    pub sku: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitResources {
    pub cpu: f64,
    pub memory_gb: f64,
    pub gpu: Option<GpuRequest>,
}

/// Everything a provider needs to start one worker container.
///
/// Units never restart on their own; a finished worker stays finished.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitSpec {
    pub name: String,
    pub image: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub labels: BTreeMap<String, String>,
    pub mounts: Vec<VolumeMount>,
    pub resources: UnitResources,
}

/// Provider-side provisioning progress of a unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ProvisioningState {
    /// Still being created.
    Pending,
    Succeeded,
    Failed,
    Other(String),
}

/// State of the worker process inside a provisioned unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum RunState {
    /// Created but not yet executing (pulling image, restarting).
    Waiting,
    Running,
    Terminated,
    Other(String),
}

/// Raw state as reported by the provider, before projection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RawUnitState {
    pub provisioning: ProvisioningState,
    pub run: Option<RunState>,
    pub exit_code: Option<i64>,
    /// Free-form provider detail, e.g. an error message.
    pub detail: Option<String>,
}

impl RawUnitState {
    #[must_use]
    pub fn pending() -> Self {
        Self { provisioning: ProvisioningState::Pending, run: None, exit_code: None, detail: None }
    }

    #[must_use]
    pub fn running() -> Self {
        Self {
            provisioning: ProvisioningState::Succeeded,
            run: Some(RunState::Running),
            exit_code: None,
            detail: None,
        }
    }

    #[must_use]
    pub fn exited(code: i64) -> Self {
        Self {
            provisioning: ProvisioningState::Succeeded,
            run: Some(RunState::Terminated),
            exit_code: Some(code),
            detail: None,
        }
    }
}

/// Result of asking a provider about a handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Inspection {
    Present(RawUnitState),
    /// The unit does not exist (never created, or deleted externally).
    NotFound,
}
