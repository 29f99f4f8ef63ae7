//! List command implementation.

use colored::Colorize;

use super::status_label;
use crate::client::ApiClient;

/// Execute the list command.
pub async fn execute(client: &ApiClient, json_output: bool) -> anyhow::Result<()> {
    let jobs = client.list().await?;
    if json_output {
        return super::print_json(&jobs);
    }

    if jobs.is_empty() {
        println!("{}", "No jobs".yellow());
        return Ok(());
    }

    println!("{}", format!("{:<38} {:<14} {:<26} {}", "JOB ID", "STATUS", "CREATED", "DATASET").bold());
    for job in &jobs {
        // Pad before colouring so escape codes do not break alignment
        let status = format!("{:<14}", job.status.as_str());
        let status = status.replace(job.status.as_str(), &status_label(job.status).to_string());
        println!(
            "{:<38} {} {:<26} {}",
            job.job_id.as_str(),
            status,
            job.created_at.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
            job.spec.dataset
        );
    }
    println!();
    println!("{} job(s)", jobs.len());
    Ok(())
}
