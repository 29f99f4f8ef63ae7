//! Resource provider adapters.
//!
//! A provider is the only source of truth about a compute unit. Adapters
//! translate four operations onto a concrete platform and implement no policy:
//! - `allocate`: ask the platform to create one unit
//! - `inspect`: report the unit's raw state, or that it does not exist
//! - `fetch_logs`: return the tail of the unit's output
//! - `release`: delete the unit

pub mod aci;
pub mod docker;
pub mod error;
pub mod memory;
pub mod unit;

pub use aci::AciProvider;
pub use docker::DockerProvider;
pub use error::{ProviderError, Result};
pub use memory::InMemoryProvider;
pub use unit::{
    GpuRequest, Inspection, ProviderHandle, ProvisioningState, RawUnitState, RunState,
    UnitResources, UnitSpec, VolumeMount,
};

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{ProviderConfig, ProviderKind};

/// Adapter over an external compute platform.
#[async_trait]
pub trait ResourceProvider: Send + Sync {
    /// Short identifier used in logs (`docker`, `aci`, `memory`).
    fn kind(&self) -> &'static str;

    /// Requests a new unit.
    ///
    /// Success means the platform accepted the request, not that the unit is running.
    ///
    /// # Errors
    /// Returns `ProviderError::Allocation` with the platform's message if it refuses.
    async fn allocate(&self, spec: &UnitSpec) -> Result<ProviderHandle>;

    /// Reports the raw state of a unit.
    ///
    /// A unit that does not exist is `Ok(Inspection::NotFound)`, not an error.
    async fn inspect(&self, handle: &ProviderHandle) -> Result<Inspection>;

    /// Returns up to `tail` trailing lines of the unit's output.
    async fn fetch_logs(&self, handle: &ProviderHandle, tail: usize) -> Result<String>;

    /// Deletes a unit. Releasing a unit that no longer exists succeeds.
    ///
    /// # Errors
    /// Returns `ProviderError::Release` if the platform could not delete it.
    async fn release(&self, handle: &ProviderHandle) -> Result<()>;
}

/// Provider factory for creating adapters from configuration.
pub struct ProviderFactory;

impl ProviderFactory {
    /// Creates the provider selected by `config.kind`.
    ///
    /// # Errors
    /// Returns error if the selected provider is missing required settings.
    pub fn create(config: &ProviderConfig) -> Result<Arc<dyn ResourceProvider>> {
        match config.kind {
            ProviderKind::Docker => Ok(Arc::new(DockerProvider::new(config.docker.clone()))),
            ProviderKind::Aci => {
                let aci = config.aci.clone().ok_or_else(|| {
                    ProviderError::Unavailable(
                        "provider.kind is \"aci\" but no [provider.aci] section is configured"
                            .to_string(),
                    )
                })?;
                Ok(Arc::new(AciProvider::new(aci)?))
            }
        }
    }
}
