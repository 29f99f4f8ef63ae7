//! In-process provider with scriptable state.
//!
//! Units are stored in a map; their observed state, logs and failures are set
//! by the caller. Integration tests drive the orchestrator with it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::error::{ProviderError, Result};
use super::unit::{Inspection, ProviderHandle, RawUnitState, UnitSpec};
use super::ResourceProvider;

#[derive(Debug, Clone)]
struct MemoryUnit {
    spec: UnitSpec,
    state: Inspection,
    logs: String,
}

#[derive(Default)]
struct Faults {
    allocate: Option<String>,
    lost_ack: Option<String>,
    release: Option<String>,
    inspect: Option<String>,
    release_delay: Option<Duration>,
    inspect_delay: Option<Duration>,
}

/// Provider that keeps units in memory.
#[derive(Default)]
pub struct InMemoryProvider {
    units: Mutex<HashMap<ProviderHandle, MemoryUnit>>,
    faults: Mutex<Faults>,
    allocate_calls: AtomicUsize,
    inspect_calls: AtomicUsize,
    logs_calls: AtomicUsize,
    release_calls: AtomicUsize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl InMemoryProvider {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every following `allocate` fail with `message` until cleared.
    pub fn fail_allocations(&self, message: Option<&str>) {
        lock(&self.faults).allocate = message.map(str::to_string);
    }

    /// Makes `allocate` create the unit and then fail with `Unavailable(message)`,
    /// as when the acknowledgement is lost in transit.
    pub fn lose_allocation_acks(&self, message: Option<&str>) {
        lock(&self.faults).lost_ack = message.map(str::to_string);
    }

    /// Makes every following `release` fail with `message` until cleared.
    pub fn fail_releases(&self, message: Option<&str>) {
        lock(&self.faults).release = message.map(str::to_string);
    }

    /// Makes every following `inspect` fail with `message` until cleared.
    pub fn fail_inspections(&self, message: Option<&str>) {
        lock(&self.faults).inspect = message.map(str::to_string);
    }

    /// Delays `release` calls, to widen race windows in tests.
    pub fn set_release_delay(&self, delay: Option<Duration>) {
        lock(&self.faults).release_delay = delay;
    }

    /// Delays `inspect` calls.
    pub fn set_inspect_delay(&self, delay: Option<Duration>) {
        lock(&self.faults).inspect_delay = delay;
    }

    /// Sets what `inspect` reports for a unit. Unknown handles are ignored.
    pub fn set_state(&self, handle: &ProviderHandle, state: Inspection) {
        if let Some(unit) = lock(&self.units).get_mut(handle) {
            unit.state = state;
        }
    }

    /// Replaces a unit's output.
    pub fn set_logs(&self, handle: &ProviderHandle, logs: &str) {
        if let Some(unit) = lock(&self.units).get_mut(handle) {
            unit.logs = logs.to_string();
        }
    }

    /// Removes a unit as if it had been deleted outside the service.
    pub fn remove_externally(&self, handle: &ProviderHandle) {
        lock(&self.units).remove(handle);
    }

    /// Whether a unit currently exists.
    #[must_use]
    pub fn exists(&self, handle: &ProviderHandle) -> bool {
        lock(&self.units).contains_key(handle)
    }

    /// Spec a unit was allocated with.
    #[must_use]
    pub fn spec_of(&self, handle: &ProviderHandle) -> Option<UnitSpec> {
        lock(&self.units).get(handle).map(|u| u.spec.clone())
    }

    #[must_use]
    pub fn unit_count(&self) -> usize {
        lock(&self.units).len()
    }

    #[must_use]
    pub fn allocate_calls(&self) -> usize {
        self.allocate_calls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn inspect_calls(&self) -> usize {
        self.inspect_calls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn logs_calls(&self) -> usize {
        self.logs_calls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn release_calls(&self) -> usize {
        self.release_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ResourceProvider for InMemoryProvider {
    fn kind(&self) -> &'static str {
        "memory"
    }

    async fn allocate(&self, spec: &UnitSpec) -> Result<ProviderHandle> {
        self.allocate_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = lock(&self.faults).allocate.clone() {
            return Err(ProviderError::Allocation(message));
        }

        let handle = ProviderHandle(spec.name.clone());
        let mut units = lock(&self.units);
        if units.contains_key(&handle) {
            return Err(ProviderError::Allocation(format!("unit '{}' already exists", spec.name)));
        }
        units.insert(
            handle.clone(),
            MemoryUnit { spec: spec.clone(), state: Inspection::Present(RawUnitState::pending()), logs: String::new() },
        );
        drop(units);
        debug!(handle = %handle, "Allocated in-memory unit");

        if let Some(message) = lock(&self.faults).lost_ack.clone() {
            return Err(ProviderError::Unavailable(message));
        }
        Ok(handle)
    }

    async fn inspect(&self, handle: &ProviderHandle) -> Result<Inspection> {
        self.inspect_calls.fetch_add(1, Ordering::SeqCst);
        let (delay, failure) = {
            let faults = lock(&self.faults);
            (faults.inspect_delay, faults.inspect.clone())
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(message) = failure {
            return Err(ProviderError::Inspect(message));
        }

        Ok(lock(&self.units).get(handle).map_or(Inspection::NotFound, |u| u.state.clone()))
    }

    async fn fetch_logs(&self, handle: &ProviderHandle, tail: usize) -> Result<String> {
        self.logs_calls.fetch_add(1, Ordering::SeqCst);
        let units = lock(&self.units);
        let unit = units
            .get(handle)
            .ok_or_else(|| ProviderError::Logs(format!("unit '{}' does not exist", handle)))?;

        let lines: Vec<&str> = unit.logs.lines().collect();
        let start = lines.len().saturating_sub(tail);
        Ok(lines[start..].join("\n"))
    }

    async fn release(&self, handle: &ProviderHandle) -> Result<()> {
        self.release_calls.fetch_add(1, Ordering::SeqCst);
        let (delay, failure) = {
            let faults = lock(&self.faults);
            (faults.release_delay, faults.release.clone())
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(message) = failure {
            return Err(ProviderError::Release(message));
        }

        lock(&self.units).remove(handle);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::unit::UnitResources;
    use std::collections::BTreeMap;

    fn unit(name: &str) -> UnitSpec {
        UnitSpec {
            name: name.to_string(),
            image: "trainer".to_string(),
            args: Vec::new(),
            env: BTreeMap::new(),
            labels: BTreeMap::new(),
            mounts: Vec::new(),
            resources: UnitResources { cpu: 1.0, memory_gb: 1.0, gpu: None },
        }
    }

    #[tokio::test]
    async fn test_allocate_then_inspect_pending() {
        let provider = InMemoryProvider::new();
        let handle = provider.allocate(&unit("u1")).await.unwrap();
        assert_eq!(provider.inspect(&handle).await.unwrap(), Inspection::Present(RawUnitState::pending()));
        assert_eq!(provider.allocate_calls(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_name_is_refused() {
        let provider = InMemoryProvider::new();
        provider.allocate(&unit("u1")).await.unwrap();
        assert!(matches!(provider.allocate(&unit("u1")).await, Err(ProviderError::Allocation(_))));
    }

    #[tokio::test]
    async fn test_lost_ack_still_creates_unit() {
        let provider = InMemoryProvider::new();
        provider.lose_allocation_acks(Some("operation timed out"));
        let err = provider.allocate(&unit("u1")).await.unwrap_err();
        assert!(matches!(err, ProviderError::Unavailable(_)));
        assert!(provider.exists(&ProviderHandle("u1".to_string())));
    }

    #[tokio::test]
    async fn test_logs_are_tailed() {
        let provider = InMemoryProvider::new();
        let handle = provider.allocate(&unit("u1")).await.unwrap();
        provider.set_logs(&handle, "a\nb\nc\nd");
        assert_eq!(provider.fetch_logs(&handle, 2).await.unwrap(), "c\nd");
        assert_eq!(provider.fetch_logs(&handle, 100).await.unwrap(), "a\nb\nc\nd");
    }

    #[tokio::test]
    async fn test_release_of_missing_unit_succeeds() {
        let provider = InMemoryProvider::new();
        let handle = provider.allocate(&unit("u1")).await.unwrap();
        provider.remove_externally(&handle);
        assert_eq!(provider.inspect(&handle).await.unwrap(), Inspection::NotFound);
        provider.release(&handle).await.unwrap();
    }

    #[tokio::test]
    async fn test_injected_release_failure() {
        let provider = InMemoryProvider::new();
        let handle = provider.allocate(&unit("u1")).await.unwrap();
        provider.fail_releases(Some("throttled"));
        assert!(provider.release(&handle).await.is_err());
        assert!(provider.exists(&handle));

        provider.fail_releases(None);
        provider.release(&handle).await.unwrap();
        assert!(!provider.exists(&handle));
    }
}
