//! Wait command implementation.
//!
//! Polls a job until it reaches a terminal status, optionally releasing its
//! unit afterwards.

use std::time::Duration;

use anyhow::bail;
use cinder_core::{JobStatus, JobView};
use colored::Colorize;
use tokio::time::{Instant, sleep};
use tracing::debug;

use super::{print_job, print_json, status_label};
use crate::client::ApiClient;

/// Log lines shown when a job fails.
pub const FAILURE_LOG_LINES: usize = 100;

#[derive(Debug, Clone)]
pub struct WaitOptions {
    pub interval: Duration,
    pub timeout: Option<Duration>,
    /// Release the unit once the job is finished.
    pub cleanup: bool,
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self { interval: Duration::from_secs(30), timeout: None, cleanup: false }
    }
}

/// Execute the wait command.
pub async fn execute(client: &ApiClient, job_id: &str, options: &WaitOptions, json_output: bool) -> anyhow::Result<()> {
    wait_for_job(client, job_id, options, json_output).await
}

/// Polls until the job is terminal.
///
/// Fails unless the job completed within the timeout.
pub async fn wait_for_job(
    client: &ApiClient,
    job_id: &str,
    options: &WaitOptions,
    json_output: bool,
) -> anyhow::Result<()> {
    let started = Instant::now();
    let mut last_status: Option<JobStatus> = None;

    let job = loop {
        let job = client.status(job_id).await?;
        if last_status != Some(job.status) {
            if !json_output {
                println!("[{:>5}s] {}", started.elapsed().as_secs(), status_label(job.status));
            }
            last_status = Some(job.status);
        }
        if job.status.is_terminal() {
            break job;
        }

        if let Some(timeout) = options.timeout {
            if started.elapsed() >= timeout {
                bail!("Timed out after {}s waiting for job {} (last status: {})", timeout.as_secs(), job_id, job.status);
            }
        }
        debug!(job_id, interval_secs = options.interval.as_secs(), "Job still active");
        sleep(options.interval).await;
    };

    let outcome = effective_outcome(&job);
    let failed = outcome == JobStatus::Failed;
    if failed && !json_output {
        print_failure_logs(client, job_id).await;
    }

    let job = if options.cleanup { release(client, job, json_output).await? } else { job };

    if json_output {
        print_json(&job)?;
    } else {
        println!();
        print_job(&job);
    }

    match outcome {
        JobStatus::Completed => Ok(()),
        JobStatus::CleanedUp => {
            if !json_output {
                println!("{}", "Job was cancelled before it finished".yellow());
            }
            bail!("Job {} was cancelled: its compute unit was released before it finished", job_id)
        }
        _ => bail!("Job {} failed: {}", job_id, job.failure_reason.as_deref().unwrap_or("unknown reason")),
    }
}

/// How the job ended. `cleaned_up` without an outcome means it was cancelled.
fn effective_outcome(job: &JobView) -> JobStatus {
    job.outcome.unwrap_or(job.status)
}

async fn print_failure_logs(client: &ApiClient, job_id: &str) {
    match client.logs(job_id, Some(FAILURE_LOG_LINES)).await {
        Ok(logs) => {
            println!();
            println!("{}", format!("Last {} log lines:", FAILURE_LOG_LINES).bold());
            println!("{}", logs.logs);
        }
        Err(e) => println!("{}", format!("Logs unavailable: {}", e).dimmed()),
    }
}

async fn release(client: &ApiClient, job: JobView, json_output: bool) -> anyhow::Result<JobView> {
    let result = client.cleanup(job.job_id.as_str()).await?;
    if !json_output {
        println!("{} {}", "✓".green(), result.message);
    }
    client.status(job.job_id.as_str()).await
}
