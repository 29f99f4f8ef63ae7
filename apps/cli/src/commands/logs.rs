//! Logs command implementation.

use serde_json::json;

use crate::client::ApiClient;

/// Execute the logs command.
pub async fn execute(client: &ApiClient, job_id: &str, tail: Option<usize>, json_output: bool) -> anyhow::Result<()> {
    let logs = client.logs(job_id, tail).await?;
    if json_output {
        super::print_json(&json!({ "job_id": logs.job_id, "tail": logs.tail, "logs": logs.logs }))
    } else {
        println!("{}", logs.logs);
        Ok(())
    }
}
