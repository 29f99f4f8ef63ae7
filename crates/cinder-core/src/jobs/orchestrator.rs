//! Job lifecycle orchestration.
//!
//! The orchestrator is the only writer of job records. Every operation that
//! talks to the provider on behalf of a job holds that job's lock for the
//! whole round-trip, so observations and cleanup of one job never interleave.

use std::sync::Arc;

use chrono::Utc;
use cinder_training::{TrainingDefaults, TrainingError, TrainingJobId, TrainingRequest};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::provider::{Inspection, ProviderError, ProviderHandle, ResourceProvider};

use super::model::{Job, JobStatus, JobView};
use super::projector::project;
use super::registry::JobRegistry;
use super::template::UnitTemplate;

/// Lines returned by `get_logs` when the caller does not ask for a count.
pub const DEFAULT_LOG_TAIL: usize = 1000;
/// Upper bound on the `tail` a caller may request.
pub const MAX_LOG_TAIL: usize = 10_000;

/// Errors returned by orchestrator operations.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("job not found: {0}")]
    NotFound(TrainingJobId),

    #[error(transparent)]
    InvalidSpec(#[from] TrainingError),

    #[error("job {0} has no compute unit yet")]
    NoResourceYet(TrainingJobId),

    #[error("compute unit of job {0} has already been released")]
    ResourceReleased(TrainingJobId),

    #[error(transparent)]
    Provider(#[from] ProviderError),
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// Tracks training jobs and drives their compute units through a provider.
pub struct JobOrchestrator {
    provider: Arc<dyn ResourceProvider>,
    registry: JobRegistry,
    template: UnitTemplate,
    defaults: TrainingDefaults,
}

impl std::fmt::Debug for JobOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobOrchestrator")
            .field("provider", &self.provider.kind())
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl JobOrchestrator {
    #[must_use]
    pub fn new(provider: Arc<dyn ResourceProvider>, template: UnitTemplate, defaults: TrainingDefaults) -> Self {
        Self { provider, registry: JobRegistry::new(), template, defaults }
    }

    #[must_use]
    pub fn from_config(provider: Arc<dyn ResourceProvider>, config: &Config) -> Self {
        Self::new(provider, UnitTemplate::from_config(&config.provider), config.training.clone())
    }

    #[must_use]
    pub fn provider_kind(&self) -> &'static str {
        self.provider.kind()
    }

    /// Validates a request, records the job and asks the provider for a unit.
    ///
    /// Returns once the provider has accepted or refused the unit. A refusal
    /// still yields a job, in `failed`, carrying the provider's message. When
    /// the outcome is unknown the job also fails but keeps the unit name as its
    /// handle, so `cleanup` still releases anything that was created.
    ///
    /// # Errors
    /// Returns `InvalidSpec` before anything is recorded or allocated.
    pub async fn submit(&self, request: TrainingRequest) -> Result<JobView> {
        let spec = request.resolve(&self.defaults)?;
        let job = Job::new(TrainingJobId::new(), spec);
        let unit = self.template.render(&job.job_id, &job.spec, job.created_at);

        let mut job = self.registry.insert_locked(job).await;
        info!(job_id = %job.job_id, unit = %unit.name, provider = self.provider.kind(), "Submitting training job");

        match self.provider.allocate(&unit).await {
            Ok(handle) => {
                info!(job_id = %job.job_id, handle = %handle, "Compute unit accepted for provisioning");
                job.mark_allocated(handle);
            }
            Err(ProviderError::Allocation(reason)) => {
                warn!(job_id = %job.job_id, reason = %reason, "Allocation refused");
                job.mark_failed(None, reason);
            }
            Err(e) => {
                // The unit may exist even though the acknowledgement was lost.
                // Its name is deterministic, so keep it as the handle for cleanup.
                let handle = ProviderHandle(unit.name.clone());
                warn!(job_id = %job.job_id, handle = %handle, error = %e, "Allocation outcome unknown");
                job.provider_handle = Some(handle);
                job.mark_failed(None, e.to_string());
            }
        }

        Ok(job.view())
    }

    /// Returns the job, refreshed from the provider unless it is terminal.
    ///
    /// # Errors
    /// Returns `NotFound` for unknown ids and `Provider` if the unit could not
    /// be inspected; the record is unchanged in that case.
    pub async fn get_status(&self, job_id: &TrainingJobId) -> Result<JobView> {
        let record = self.registry.get(job_id).await.ok_or_else(|| OrchestratorError::NotFound(job_id.clone()))?;
        let mut job = record.lock().await;

        if job.status.is_terminal() {
            return Ok(job.view());
        }
        let Some(handle) = job.live_handle().cloned() else {
            return Ok(job.view());
        };

        let inspection = self.provider.inspect(&handle).await?;
        Self::observe(&mut job, &inspection);
        Ok(job.view())
    }

    fn observe(job: &mut Job, inspection: &Inspection) {
        let previous = job.status;
        let projection = project(previous, inspection);
        job.last_observed_at = Some(Utc::now());

        let advanced = match projection.status {
            JobStatus::Failed => {
                job.mark_failed(projection.exit_code, projection.reason.unwrap_or_default())
            }
            status => {
                let advanced = job.advance(status);
                if advanced && projection.exit_code.is_some() {
                    job.exit_code = projection.exit_code;
                }
                advanced
            }
        };

        if advanced {
            info!(
                job_id = %job.job_id,
                from = %previous,
                to = %job.status,
                reason = job.failure_reason.as_deref().unwrap_or(""),
                "Job status changed"
            );
        } else if projection.status != previous {
            debug!(job_id = %job.job_id, current = %previous, observed = %projection.status, "Ignoring regressing observation");
        }
    }

    /// Returns the trailing output of the job's unit.
    ///
    /// `tail` defaults to [`DEFAULT_LOG_TAIL`] and is clamped to `1..=MAX_LOG_TAIL`.
    /// Never changes the job's status.
    pub async fn get_logs(&self, job_id: &TrainingJobId, tail: Option<usize>) -> Result<String> {
        let tail = tail.unwrap_or(DEFAULT_LOG_TAIL).clamp(1, MAX_LOG_TAIL);
        let record = self.registry.get(job_id).await.ok_or_else(|| OrchestratorError::NotFound(job_id.clone()))?;

        let handle = {
            let job = record.lock().await;
            if job.released_at.is_some() {
                return Err(OrchestratorError::ResourceReleased(job_id.clone()));
            }
            job.provider_handle.clone().ok_or_else(|| OrchestratorError::NoResourceYet(job_id.clone()))?
        };

        debug!(job_id = %job_id, handle = %handle, tail, "Fetching logs");
        Ok(self.provider.fetch_logs(&handle, tail).await?)
    }

    /// Releases the job's unit and marks the job `cleaned_up`.
    ///
    /// Idempotent: a job without a live unit is returned unchanged and the
    /// provider is not contacted.
    ///
    /// # Errors
    /// Returns `Provider` if the release failed; the job keeps its status so
    /// the caller can retry.
    pub async fn cleanup(&self, job_id: &TrainingJobId) -> Result<JobView> {
        let record = self.registry.get(job_id).await.ok_or_else(|| OrchestratorError::NotFound(job_id.clone()))?;
        let mut job = record.lock().await;

        let Some(handle) = job.live_handle().cloned() else {
            debug!(job_id = %job_id, status = %job.status, "Nothing to release");
            return Ok(job.view());
        };

        if let Err(e) = self.provider.release(&handle).await {
            warn!(job_id = %job_id, handle = %handle, error = %e, "Release failed");
            return Err(e.into());
        }

        let previous = job.status;
        job.mark_released();
        info!(job_id = %job_id, handle = %handle, from = %previous, "Compute unit released");
        Ok(job.view())
    }

    /// Every known job from the cache, oldest first.
    pub async fn list(&self) -> Vec<JobView> {
        let mut views = Vec::new();
        for record in self.registry.all().await {
            views.push(record.lock().await.view());
        }
        views.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.job_id.cmp(&b.job_id)));
        views
    }

    pub async fn job_count(&self) -> usize {
        self.registry.len().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderConfig;
    use crate::provider::{InMemoryProvider, RawUnitState};

    fn orchestrator() -> (Arc<InMemoryProvider>, JobOrchestrator) {
        let provider = Arc::new(InMemoryProvider::new());
        let orchestrator = JobOrchestrator::new(
            provider.clone(),
            UnitTemplate::from_config(&ProviderConfig::default()),
            TrainingDefaults::default(),
        );
        (provider, orchestrator)
    }

    fn handle(view: &JobView) -> ProviderHandle {
        view.provider_handle.clone().unwrap()
    }

    #[tokio::test]
    async fn test_submit_allocates_once() {
        let (provider, orch) = orchestrator();
        let view = orch.submit(TrainingRequest::new("d1", "m1")).await.unwrap();

        assert_eq!(view.status, JobStatus::Provisioning);
        assert_eq!(handle(&view).as_str(), format!("training-{}", view.job_id));
        assert_eq!(provider.allocate_calls(), 1);
    }

    #[tokio::test]
    async fn test_status_regression_is_ignored() {
        let (provider, orch) = orchestrator();
        let view = orch.submit(TrainingRequest::new("d1", "m1")).await.unwrap();

        provider.set_state(&handle(&view), Inspection::Present(RawUnitState::running()));
        assert_eq!(orch.get_status(&view.job_id).await.unwrap().status, JobStatus::Running);

        provider.set_state(&handle(&view), Inspection::Present(RawUnitState::pending()));
        let view = orch.get_status(&view.job_id).await.unwrap();
        assert_eq!(view.status, JobStatus::Running);
        assert!(view.last_observed_at.is_some());
    }

    #[tokio::test]
    async fn test_inspect_error_leaves_job_unchanged() {
        let (provider, orch) = orchestrator();
        let view = orch.submit(TrainingRequest::new("d1", "m1")).await.unwrap();

        provider.fail_inspections(Some("connection reset"));
        let err = orch.get_status(&view.job_id).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Provider(ProviderError::Inspect(_))));

        provider.fail_inspections(None);
        let refreshed = orch.get_status(&view.job_id).await.unwrap();
        assert_eq!(refreshed.status, JobStatus::Provisioning);
    }

    #[tokio::test]
    async fn test_logs_tail_is_clamped() {
        let (provider, orch) = orchestrator();
        let view = orch.submit(TrainingRequest::new("d1", "m1")).await.unwrap();
        provider.set_logs(&handle(&view), "one\ntwo\nthree");

        assert_eq!(orch.get_logs(&view.job_id, Some(0)).await.unwrap(), "three");
        assert_eq!(orch.get_logs(&view.job_id, None).await.unwrap(), "one\ntwo\nthree");
    }

    #[tokio::test]
    async fn test_logs_after_release() {
        let (_provider, orch) = orchestrator();
        let view = orch.submit(TrainingRequest::new("d1", "m1")).await.unwrap();
        orch.cleanup(&view.job_id).await.unwrap();

        let err = orch.get_logs(&view.job_id, None).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::ResourceReleased(_)));
    }

    #[tokio::test]
    async fn test_unknown_job() {
        let (_provider, orch) = orchestrator();
        let id = TrainingJobId::from("missing");
        assert!(matches!(orch.get_status(&id).await, Err(OrchestratorError::NotFound(_))));
        assert!(matches!(orch.get_logs(&id, None).await, Err(OrchestratorError::NotFound(_))));
        assert!(matches!(orch.cleanup(&id).await, Err(OrchestratorError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_list_is_sorted_by_creation() {
        let (_provider, orch) = orchestrator();
        let first = orch.submit(TrainingRequest::new("d1", "m1")).await.unwrap();
        let second = orch.submit(TrainingRequest::new("d2", "m2")).await.unwrap();

        let jobs = orch.list().await;
        assert_eq!(jobs.len(), 2);
        assert!(jobs[0].created_at <= jobs[1].created_at);
        assert!(jobs.iter().any(|j| j.job_id == first.job_id));
        assert!(jobs.iter().any(|j| j.job_id == second.job_id));
    }
}
