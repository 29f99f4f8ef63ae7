//! Submit command implementation.

use clap::Args;
use cinder_training::TrainingRequest;
use colored::Colorize;

use super::{print_job, print_json, wait};
use crate::client::ApiClient;

#[derive(Args, Debug)]
pub struct SubmitArgs {
    /// Dataset archive, relative to the dataset share
    #[arg(long, visible_alias = "coco-zip")]
    pub dataset: String,

    /// Base model weights, relative to the model share
    #[arg(long, visible_alias = "base")]
    pub base_model: String,

    /// Output directory, relative to the output share (default: tflite/<job_id>)
    #[arg(long)]
    pub output_dir: Option<String>,

    #[arg(long)]
    pub epochs: Option<i64>,

    /// Early-stopping patience in epochs
    #[arg(long)]
    pub patience: Option<i64>,

    #[arg(long)]
    pub batch: Option<i64>,

    /// Training image size (multiple of 32)
    #[arg(long)]
    pub imgsz: Option<i64>,

    /// "cpu" or a GPU index
    #[arg(long)]
    pub device: Option<String>,

    /// Wait for the job to finish after submitting
    #[arg(long)]
    pub wait: bool,
}

impl SubmitArgs {
    fn into_request(self) -> TrainingRequest {
        TrainingRequest {
            dataset: Some(self.dataset),
            base_model: Some(self.base_model),
            output_dir: self.output_dir,
            epochs: self.epochs,
            patience: self.patience,
            batch: self.batch,
            imgsz: self.imgsz,
            device: self.device,
        }
    }
}

/// Execute the submit command.
pub async fn execute(client: &ApiClient, args: SubmitArgs, json_output: bool) -> anyhow::Result<()> {
    let follow = args.wait;
    let submitted = client.submit(&args.into_request()).await?;

    if json_output {
        print_json(&submitted)?;
    } else {
        println!("{}", "Training job submitted".green().bold());
        print_job(&submitted.job);
        if let Some(ref url) = submitted.status_url {
            println!("  Poll:     {}", url);
        }
    }
    let job = submitted.job;

    if follow {
        let options = wait::WaitOptions::default();
        wait::wait_for_job(client, job.job_id.as_str(), &options, json_output).await?;
    }
    Ok(())
}
