//! CLI command implementations.

pub mod cleanup;
pub mod list;
pub mod logs;
pub mod status;
pub mod submit;
pub mod wait;

use cinder_core::{JobStatus, JobView};
use colored::{ColoredString, Colorize};

/// Colours a status for terminal output.
pub fn status_label(status: JobStatus) -> ColoredString {
    let label = status.as_str();
    match status {
        JobStatus::Submitted | JobStatus::Provisioning => label.yellow(),
        JobStatus::Running => label.cyan(),
        JobStatus::Completed => label.green(),
        JobStatus::Failed => label.red(),
        JobStatus::CleanedUp => label.dimmed(),
    }
}

/// Prints a job in human-readable form.
pub fn print_job(job: &JobView) {
    println!("{} {}", "Job".bold(), job.job_id.to_string().cyan());
    println!("  Status:   {}", status_label(job.status));
    if let Some(outcome) = job.outcome.filter(|o| *o != job.status) {
        println!("  Outcome:  {}", status_label(outcome));
    }
    if let Some(ref handle) = job.provider_handle {
        let released = if job.resource_released { " (released)".dimmed() } else { "".normal() };
        println!("  Unit:     {}{}", handle, released);
    }
    if let Some(code) = job.exit_code {
        println!("  Exit:     {}", code);
    }
    if let Some(ref reason) = job.failure_reason {
        println!("  Reason:   {}", reason.red());
    }
    let hp = &job.spec.hyperparams;
    println!("  Dataset:  {}", job.spec.dataset);
    println!("  Base:     {}", job.spec.base_model);
    println!("  Output:   {}", job.output_dir);
    println!(
        "  Params:   epochs={} patience={} batch={} imgsz={} device={}",
        hp.epochs, hp.patience, hp.batch, hp.imgsz, job.spec.device
    );
    println!("  Created:  {}", job.created_at.to_rfc3339());
    if let Some(observed) = job.last_observed_at {
        println!("  Observed: {}", observed.to_rfc3339());
    }
}

/// Prints any serializable value as pretty JSON.
pub fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
