//! Cleanup command implementation.

use colored::Colorize;
use serde_json::json;

use crate::client::ApiClient;

/// Execute the cleanup command.
///
/// Safe to repeat: cleaning up a job without a live unit is a no-op.
pub async fn execute(client: &ApiClient, job_id: &str, json_output: bool) -> anyhow::Result<()> {
    let result = client.cleanup(job_id).await?;
    if json_output {
        super::print_json(&json!({ "job_id": result.job_id, "status": result.status, "message": result.message }))
    } else {
        println!("{} {} ({})", "✓".green(), result.message, result.status);
        Ok(())
    }
}
