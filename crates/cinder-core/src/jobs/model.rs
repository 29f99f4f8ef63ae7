//! Job records and their lifecycle states.

use std::fmt;

use chrono::{DateTime, Utc};
use cinder_training::{TrainingJobId, TrainingJobSpec};
use serde::{Deserialize, Serialize};

use crate::provider::ProviderHandle;

/// Lifecycle status of a training job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Accepted, allocation not yet acknowledged.
    Submitted,
    /// The provider accepted the unit and is creating it.
    Provisioning,
    /// The worker is executing.
    Running,
    /// The worker exited with code 0.
    Completed,
    /// Allocation failed, the worker exited non-zero, or the unit vanished.
    Failed,
    /// The unit was released on request.
    CleanedUp,
}

impl JobStatus {
    /// `completed`, `failed` and `cleaned_up` are terminal.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::CleanedUp)
    }

    /// Checks if a job may move from this status to `to`.
    ///
    /// Staying in the same status counts as valid.
    #[must_use]
    #[allow(clippy::match_same_arms)] // Each arm represents a distinct lifecycle edge
    pub fn can_transition_to(self, to: Self) -> bool {
        match (self, to) {
            (a, b) if a == b => true,
            (Self::CleanedUp, _) => false,
            // Cleanup is reachable from everywhere else
            (_, Self::CleanedUp) => true,
            (Self::Submitted, Self::Provisioning | Self::Failed) => true,
            // A unit may finish between two observations
            (Self::Provisioning, Self::Running | Self::Completed | Self::Failed) => true,
            (Self::Running, Self::Completed | Self::Failed) => true,
            _ => false,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Submitted => "submitted",
            Self::Provisioning => "provisioning",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::CleanedUp => "cleaned_up",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Registry record for one submission.
#[derive(Debug, Clone)]
pub struct Job {
    pub job_id: TrainingJobId,
    pub spec: TrainingJobSpec,
    /// Output directory relative to the output share.
    pub output_dir: String,
    pub provider_handle: Option<ProviderHandle>,
    pub status: JobStatus,
    /// `completed` or `failed`, kept after the job is cleaned up.
    pub outcome: Option<JobStatus>,
    pub exit_code: Option<i64>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_observed_at: Option<DateTime<Utc>>,
    pub released_at: Option<DateTime<Utc>>,
}

impl Job {
    #[must_use]
    pub fn new(job_id: TrainingJobId, spec: TrainingJobSpec) -> Self {
        let output_dir = spec.output_dir_for(&job_id);
        Self {
            job_id,
            spec,
            output_dir,
            provider_handle: None,
            status: JobStatus::Submitted,
            outcome: None,
            exit_code: None,
            failure_reason: None,
            created_at: Utc::now(),
            last_observed_at: None,
            released_at: None,
        }
    }

    /// Handle of a unit that exists and has not been released.
    #[must_use]
    pub fn live_handle(&self) -> Option<&ProviderHandle> {
        self.provider_handle.as_ref().filter(|_| self.released_at.is_none())
    }

    /// Moves the job forward to `to`.
    ///
    /// Returns `false` and leaves the record untouched if the move would regress.
    pub fn advance(&mut self, to: JobStatus) -> bool {
        if self.status == to || !self.status.can_transition_to(to) {
            return false;
        }
        if matches!(to, JobStatus::Completed | JobStatus::Failed) {
            self.outcome = Some(to);
        }
        self.status = to;
        true
    }

    /// Records that the unit was allocated and accepted by the provider.
    pub fn mark_allocated(&mut self, handle: ProviderHandle) {
        self.provider_handle = Some(handle);
        self.advance(JobStatus::Provisioning);
    }

    /// Records a failure with the reason the caller will see.
    pub fn mark_failed(&mut self, exit_code: Option<i64>, reason: impl Into<String>) -> bool {
        if !self.advance(JobStatus::Failed) {
            return false;
        }
        self.exit_code = exit_code;
        self.failure_reason = Some(reason.into());
        true
    }

    /// Records that the unit is gone and the job is cleaned up.
    pub fn mark_released(&mut self) {
        if self.provider_handle.is_some() && self.released_at.is_none() {
            self.released_at = Some(Utc::now());
        }
        self.advance(JobStatus::CleanedUp);
    }

    #[must_use]
    pub fn view(&self) -> JobView {
        JobView {
            job_id: self.job_id.clone(),
            status: self.status,
            outcome: self.outcome,
            provider_handle: self.provider_handle.clone(),
            resource_released: self.released_at.is_some(),
            exit_code: self.exit_code,
            failure_reason: self.failure_reason.clone(),
            spec: self.spec.clone(),
            output_dir: self.output_dir.clone(),
            created_at: self.created_at,
            last_observed_at: self.last_observed_at,
            released_at: self.released_at,
        }
    }
}

/// Snapshot of a job returned by every API operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobView {
    pub job_id: TrainingJobId,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<JobStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_handle: Option<ProviderHandle>,
    #[serde(default)]
    pub resource_released: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    pub spec: TrainingJobSpec,
    pub output_dir: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_observed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub released_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use cinder_training::{TrainingDefaults, TrainingRequest};

    fn job() -> Job {
        let spec = TrainingRequest::new("d1.zip", "m1.pt").resolve(&TrainingDefaults::default()).unwrap();
        Job::new(TrainingJobId::from("job-1"), spec)
    }

    #[test]
    fn test_forward_transitions() {
        use JobStatus::*;
        assert!(Submitted.can_transition_to(Provisioning));
        assert!(Submitted.can_transition_to(Failed));
        assert!(Provisioning.can_transition_to(Running));
        assert!(Provisioning.can_transition_to(Completed));
        assert!(Running.can_transition_to(Completed));
        assert!(Running.can_transition_to(Failed));
        assert!(Completed.can_transition_to(CleanedUp));
        assert!(Failed.can_transition_to(CleanedUp));
        assert!(Submitted.can_transition_to(CleanedUp));
    }

    #[test]
    fn test_regressions_are_rejected() {
        use JobStatus::*;
        assert!(!Running.can_transition_to(Provisioning));
        assert!(!Completed.can_transition_to(Running));
        assert!(!Completed.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Completed));
        assert!(!Submitted.can_transition_to(Running));
        assert!(!CleanedUp.can_transition_to(Completed));
        assert!(!CleanedUp.can_transition_to(Failed));
    }

    #[test]
    fn test_advance_keeps_outcome_through_cleanup() {
        let mut job = job();
        job.mark_allocated(ProviderHandle("training-job-1".to_string()));
        assert!(job.advance(JobStatus::Running));
        assert!(job.advance(JobStatus::Completed));
        assert!(!job.advance(JobStatus::Running));

        job.mark_released();
        assert_eq!(job.status, JobStatus::CleanedUp);
        assert_eq!(job.outcome, Some(JobStatus::Completed));
        assert!(job.released_at.is_some());
        assert!(job.live_handle().is_none());
    }

    #[test]
    fn test_mark_failed_only_once() {
        let mut job = job();
        assert!(job.mark_failed(None, "quota exceeded"));
        assert!(!job.mark_failed(Some(1), "exit code 1"));
        assert_eq!(job.failure_reason.as_deref(), Some("quota exceeded"));
        assert_eq!(job.exit_code, None);
    }

    #[test]
    fn test_view_serializes_snake_case_status() {
        let mut job = job();
        job.mark_failed(None, "quota exceeded");
        let json = serde_json::to_value(job.view()).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["outcome"], "failed");
        assert_eq!(json["job_id"], "job-1");
        assert_eq!(json["output_dir"], "tflite/job-1");
        assert_eq!(json["resource_released"], false);
    }
}
