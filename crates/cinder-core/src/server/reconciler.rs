//! Periodic status refresh for jobs nobody is polling.
//!
//! Uses the same orchestrator operations as API callers, so it takes the same
//! per-job locks and never races a concurrent request.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::ReconcilerConfig;
use crate::jobs::{JobOrchestrator, JobStatus};

/// Counts from one pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub refreshed: usize,
    pub released: usize,
    pub errors: usize,
}

pub struct Reconciler {
    orchestrator: Arc<JobOrchestrator>,
    config: ReconcilerConfig,
}

impl Reconciler {
    #[must_use]
    pub fn new(orchestrator: Arc<JobOrchestrator>, config: ReconcilerConfig) -> Self {
        Self { orchestrator, config }
    }

    /// Refreshes every non-terminal job once, then releases finished units
    /// when `release_terminal` is set.
    pub async fn run_once(&self) -> ReconcileReport {
        let mut report = ReconcileReport::default();

        for job in self.orchestrator.list().await {
            let mut view = job;
            if !view.status.is_terminal() && view.provider_handle.is_some() {
                match self.orchestrator.get_status(&view.job_id).await {
                    Ok(refreshed) => {
                        report.refreshed += 1;
                        view = refreshed;
                    }
                    Err(e) => {
                        report.errors += 1;
                        warn!(job_id = %view.job_id, error = %e, "Status refresh failed");
                        continue;
                    }
                }
            }

            let finished = matches!(view.status, JobStatus::Completed | JobStatus::Failed);
            if self.config.release_terminal && finished && view.provider_handle.is_some() && !view.resource_released {
                match self.orchestrator.cleanup(&view.job_id).await {
                    Ok(_) => report.released += 1,
                    Err(e) => {
                        report.errors += 1;
                        warn!(job_id = %view.job_id, error = %e, "Release of finished job failed");
                    }
                }
            }
        }

        report
    }

    /// Runs passes every `interval_secs` until `shutdown` fires or its sender is dropped.
    pub fn spawn(self, mut shutdown: watch::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let period = Duration::from_secs(self.config.interval_secs.max(1));
            info!(interval_secs = period.as_secs(), release_terminal = self.config.release_terminal, "Reconciler started");

            let mut interval = time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = shutdown.changed() => {
                        info!("Reconciler shutdown signal received");
                        break;
                    }
                    _ = interval.tick() => {
                        let report = self.run_once().await;
                        debug!(refreshed = report.refreshed, released = report.released, errors = report.errors, "Reconcile pass finished");
                    }
                }
            }
        })
    }
}
