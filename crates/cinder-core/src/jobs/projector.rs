//! Maps raw provider observations onto job statuses.
//!
//! Pure and side-effect free. Anything the projector does not recognise becomes
//! `failed` rather than being reported as progress.

use crate::provider::{Inspection, ProvisioningState, RawUnitState, RunState};

use super::model::JobStatus;

/// Status derived from one observation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Projection {
    pub status: JobStatus,
    pub exit_code: Option<i64>,
    /// Set when `status` is `failed`.
    pub reason: Option<String>,
}

impl Projection {
    fn status(status: JobStatus) -> Self {
        Self { status, exit_code: None, reason: None }
    }

    fn failed(exit_code: Option<i64>, reason: impl Into<String>) -> Self {
        Self { status: JobStatus::Failed, exit_code, reason: Some(reason.into()) }
    }
}

pub const RESOURCE_DISAPPEARED: &str = "resource disappeared";

/// Projects an observation taken while the job was in `previous`.
///
/// A missing unit is a failure whatever `previous` was: callers only inspect
/// jobs that hold a live handle, so the unit should exist.
#[must_use]
pub fn project(previous: JobStatus, inspection: &Inspection) -> Projection {
    match inspection {
        Inspection::NotFound => {
            tracing::debug!(previous = %previous, "Unit not found during observation");
            Projection::failed(None, RESOURCE_DISAPPEARED)
        }
        Inspection::Present(state) => project_state(state),
    }
}

fn project_state(state: &RawUnitState) -> Projection {
    match state.provisioning {
        ProvisioningState::Pending => Projection::status(JobStatus::Provisioning),
        ProvisioningState::Failed => {
            let detail = state.detail.as_deref().unwrap_or("no detail");
            Projection::failed(None, format!("provisioning failed: {}", detail))
        }
        ProvisioningState::Other(ref other) => {
            Projection::failed(None, format!("unknown provider state: {}", other))
        }
        ProvisioningState::Succeeded => match state.run {
            None | Some(RunState::Waiting) => Projection::status(JobStatus::Provisioning),
            Some(RunState::Running) => Projection::status(JobStatus::Running),
            Some(RunState::Terminated) => match state.exit_code {
                Some(0) => Projection { status: JobStatus::Completed, exit_code: Some(0), reason: None },
                Some(code) => Projection::failed(Some(code), with_detail(format!("exit code {}", code), state)),
                None => Projection::failed(None, with_detail("exited without exit code".to_string(), state)),
            },
            Some(RunState::Other(ref other)) => {
                Projection::failed(None, format!("unknown provider state: {}", other))
            }
        },
    }
}

fn with_detail(reason: String, state: &RawUnitState) -> String {
    match state.detail {
        Some(ref detail) => format!("{}: {}", reason, detail),
        None => reason,
    }
}
