//! Integration tests for the job lifecycle against an in-memory provider.

mod common;

use std::sync::Arc;
use std::time::Duration;

use cinder_core::jobs::{JobStatus, OrchestratorError, RESOURCE_DISAPPEARED};
use cinder_core::provider::{Inspection, ProviderError, RawUnitState};
use cinder_training::{TrainingJobId, TrainingRequest};

#[tokio::test]
async fn test_full_lifecycle_keeps_completed_history() {
    let (provider, orch) = common::orchestrator();

    let job = orch.submit(TrainingRequest::new("d1", "m1").with_epochs(5)).await.unwrap();
    assert_eq!(job.status, JobStatus::Provisioning);
    assert_eq!(job.spec.hyperparams.epochs, 5);
    let handle = job.provider_handle.clone().unwrap();

    let unit = provider.spec_of(&handle).unwrap();
    let epochs = unit.args.iter().position(|a| a == "--epochs").unwrap();
    assert_eq!(unit.args[epochs + 1], "5");

    provider.set_state(&handle, Inspection::Present(RawUnitState::running()));
    assert_eq!(orch.get_status(&job.job_id).await.unwrap().status, JobStatus::Running);

    provider.set_state(&handle, Inspection::Present(RawUnitState::exited(0)));
    let done = orch.get_status(&job.job_id).await.unwrap();
    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(done.exit_code, Some(0));

    let cleaned = orch.cleanup(&job.job_id).await.unwrap();
    assert_eq!(provider.release_calls(), 1);
    assert!(!provider.exists(&handle));

    assert_eq!(cleaned.status, JobStatus::CleanedUp);
    assert_eq!(cleaned.outcome, Some(JobStatus::Completed));
    assert!(cleaned.resource_released);

    let history = orch.get_status(&job.job_id).await.unwrap();
    assert_eq!(history.outcome, Some(JobStatus::Completed));
    assert_eq!(history.exit_code, Some(0));
    assert!(history.resource_released);
}

#[tokio::test]
async fn test_completed_is_never_reported_before_provisioning() {
    let (provider, orch) = common::orchestrator();
    let job = orch.submit(TrainingRequest::new("d1", "m1")).await.unwrap();
    assert_eq!(job.status, JobStatus::Provisioning);

    // Even if the unit already finished, the first observation is the earliest
    // point `completed` can be seen.
    provider.set_state(job.provider_handle.as_ref().unwrap(), Inspection::Present(RawUnitState::exited(0)));
    assert_eq!(orch.get_status(&job.job_id).await.unwrap().status, JobStatus::Completed);
}

#[tokio::test]
async fn test_cleanup_twice_equals_once() {
    let (provider, orch) = common::orchestrator();
    let job = orch.submit(TrainingRequest::new("d1", "m1")).await.unwrap();

    let first = orch.cleanup(&job.job_id).await.unwrap();
    let second = orch.cleanup(&job.job_id).await.unwrap();

    assert_eq!(first.status, JobStatus::CleanedUp);
    assert_eq!(second.status, JobStatus::CleanedUp);
    assert_eq!(first.released_at, second.released_at);
    assert_eq!(provider.release_calls(), 1);
}

#[tokio::test]
async fn test_allocation_failure_then_cleanup_releases_nothing() {
    let (provider, orch) = common::orchestrator();
    provider.fail_allocations(Some("QuotaExceeded: standard NC cores quota of 0 exceeded in eastus"));

    let job = orch.submit(TrainingRequest::new("d1", "m1")).await.unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.failure_reason.as_deref().unwrap().contains("QuotaExceeded"));
    assert!(job.provider_handle.is_none());

    let cleaned = orch.cleanup(&job.job_id).await.unwrap();
    assert_eq!(cleaned.status, JobStatus::Failed);
    assert_eq!(provider.release_calls(), 0);

    // Allocation is not retried behind the caller's back
    orch.get_status(&job.job_id).await.unwrap();
    assert_eq!(provider.allocate_calls(), 1);

    let err = orch.get_logs(&job.job_id, None).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::NoResourceYet(_)));
}

#[tokio::test]
async fn test_lost_allocation_ack_keeps_unit_releasable() {
    let (provider, orch) = common::orchestrator();
    provider.lose_allocation_acks(Some("operation timed out"));

    let job = orch.submit(TrainingRequest::new("d1", "m1")).await.unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.failure_reason.as_deref().unwrap().contains("operation timed out"));
    let handle = job.provider_handle.clone().expect("unit name kept as handle");
    assert_eq!(handle.as_str(), format!("training-{}", job.job_id));
    assert!(provider.exists(&handle));

    let cleaned = orch.cleanup(&job.job_id).await.unwrap();
    assert_eq!(cleaned.status, JobStatus::CleanedUp);
    assert_eq!(cleaned.outcome, Some(JobStatus::Failed));
    assert_eq!(provider.release_calls(), 1);
    assert_eq!(provider.unit_count(), 0);
}

#[tokio::test]
async fn test_unit_disappearing_after_running_fails_job() {
    let (provider, orch) = common::orchestrator();
    let job = orch.submit(TrainingRequest::new("d1", "m1")).await.unwrap();
    let handle = job.provider_handle.clone().unwrap();

    provider.set_state(&handle, Inspection::Present(RawUnitState::running()));
    orch.get_status(&job.job_id).await.unwrap();

    provider.remove_externally(&handle);
    let view = orch.get_status(&job.job_id).await.unwrap();
    assert_eq!(view.status, JobStatus::Failed);
    assert_eq!(view.failure_reason.as_deref(), Some(RESOURCE_DISAPPEARED));

    // The handle was never released by us, so cleanup still goes to the provider
    let cleaned = orch.cleanup(&job.job_id).await.unwrap();
    assert_eq!(cleaned.status, JobStatus::CleanedUp);
    assert_eq!(provider.release_calls(), 1);
}

#[tokio::test]
async fn test_invalid_spec_creates_nothing() {
    let (provider, orch) = common::orchestrator();
    let request = TrainingRequest { base_model: Some("m1".to_string()), ..TrainingRequest::default() };

    match orch.submit(request).await {
        Err(OrchestratorError::InvalidSpec(e)) => assert_eq!(e.field(), "dataset"),
        other => panic!("Expected InvalidSpec, got {:?}", other),
    }
    assert_eq!(orch.job_count().await, 0);
    assert_eq!(provider.allocate_calls(), 0);
}

#[tokio::test]
async fn test_terminal_status_does_not_contact_provider() {
    let (provider, orch) = common::orchestrator();
    let job = orch.submit(TrainingRequest::new("d1", "m1")).await.unwrap();
    provider.set_state(job.provider_handle.as_ref().unwrap(), Inspection::Present(RawUnitState::exited(1)));

    let failed = orch.get_status(&job.job_id).await.unwrap();
    assert_eq!(failed.status, JobStatus::Failed);
    assert_eq!(failed.failure_reason.as_deref(), Some("exit code 1"));

    let calls = provider.inspect_calls();
    for _ in 0..3 {
        orch.get_status(&job.job_id).await.unwrap();
    }
    assert_eq!(provider.inspect_calls(), calls);
}

#[tokio::test]
async fn test_release_failure_keeps_status_and_allows_retry() {
    let (provider, orch) = common::orchestrator();
    let job = orch.submit(TrainingRequest::new("d1", "m1")).await.unwrap();
    let handle = job.provider_handle.clone().unwrap();
    provider.set_state(&handle, Inspection::Present(RawUnitState::running()));
    orch.get_status(&job.job_id).await.unwrap();

    provider.fail_releases(Some("TooManyRequests"));
    let err = orch.cleanup(&job.job_id).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::Provider(ProviderError::Release(_))));
    assert_eq!(orch.get_status(&job.job_id).await.unwrap().status, JobStatus::Running);
    assert!(provider.exists(&handle));

    provider.fail_releases(None);
    let cleaned = orch.cleanup(&job.job_id).await.unwrap();
    assert_eq!(cleaned.status, JobStatus::CleanedUp);
    assert_eq!(cleaned.outcome, None);
    assert!(!provider.exists(&handle));
}

#[tokio::test]
async fn test_logs_are_read_only() {
    let (provider, orch) = common::orchestrator();
    let job = orch.submit(TrainingRequest::new("d1", "m1")).await.unwrap();
    let handle = job.provider_handle.clone().unwrap();
    provider.set_logs(&handle, "epoch 1\nepoch 2\nepoch 3");
    provider.set_state(&handle, Inspection::Present(RawUnitState::exited(0)));

    assert_eq!(orch.get_logs(&job.job_id, Some(2)).await.unwrap(), "epoch 2\nepoch 3");
    assert_eq!(provider.inspect_calls(), 0);
    assert_eq!(orch.list().await[0].status, JobStatus::Provisioning);
}

#[tokio::test]
async fn test_concurrent_cleanup_and_status_serialize() {
    let (provider, orch) = common::orchestrator();
    let job = orch.submit(TrainingRequest::new("d1", "m1")).await.unwrap();
    let handle = job.provider_handle.clone().unwrap();
    provider.set_state(&handle, Inspection::Present(RawUnitState::running()));
    provider.set_release_delay(Some(Duration::from_millis(100)));

    let cleanup = {
        let orch = Arc::clone(&orch);
        let id = job.job_id.clone();
        tokio::spawn(async move { orch.cleanup(&id).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    // Waits for the release to finish instead of observing the vanishing unit
    let status = orch.get_status(&job.job_id).await.unwrap();
    let cleaned = cleanup.await.unwrap().unwrap();

    assert_eq!(cleaned.status, JobStatus::CleanedUp);
    assert_eq!(status.status, JobStatus::CleanedUp);
    assert_eq!(status.failure_reason, None);
    assert_eq!(provider.release_calls(), 1);
}

#[tokio::test]
async fn test_concurrent_cleanups_release_once() {
    let (provider, orch) = common::orchestrator();
    let job = orch.submit(TrainingRequest::new("d1", "m1")).await.unwrap();
    provider.set_release_delay(Some(Duration::from_millis(50)));

    let tasks: Vec<_> = (0..5)
        .map(|_| {
            let orch = Arc::clone(&orch);
            let id = job.job_id.clone();
            tokio::spawn(async move { orch.cleanup(&id).await })
        })
        .collect();
    for task in tasks {
        assert_eq!(task.await.unwrap().unwrap().status, JobStatus::CleanedUp);
    }
    assert_eq!(provider.release_calls(), 1);
}

#[tokio::test]
async fn test_unknown_job_id() {
    let (_provider, orch) = common::orchestrator();
    let id = TrainingJobId::from("does-not-exist");
    assert!(matches!(orch.get_status(&id).await, Err(OrchestratorError::NotFound(_))));
}
