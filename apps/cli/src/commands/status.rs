//! Status command implementation.

use super::{print_job, print_json};
use crate::client::ApiClient;

/// Execute the status command.
///
/// Refreshes the job from its compute unit unless it already finished.
pub async fn execute(client: &ApiClient, job_id: &str, json_output: bool) -> anyhow::Result<()> {
    let job = client.status(job_id).await?;
    if json_output {
        print_json(&job)
    } else {
        print_job(&job);
        Ok(())
    }
}
