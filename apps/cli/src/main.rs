//! Cinder CLI - Command-line client for the Cinder training API
//!
//! Provides a `cinder` command to submit training jobs, follow their status,
//! read their logs and release their compute units.

mod client;
mod commands;

use std::time::Duration;

use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use client::ApiClient;
use commands::{cleanup, list, logs, status, submit, wait};

/// Cinder CLI - run training jobs on ephemeral compute
#[derive(Parser, Debug)]
#[command(
    name = "cinder",
    author,
    version,
    about = "Cinder - ephemeral training job control",
    long_about = "Cinder submits model training jobs to a Cinder server, which runs each one on a dedicated, short-lived compute unit.\nUse `cinder wait` to follow a job and `cinder cleanup` to release its unit."
)]
struct Args {
    /// Cinder server URL
    #[arg(long, env = "CINDER_URL", default_value = "http://127.0.0.1:8080", global = true)]
    url: String,

    /// API key for servers that require one
    #[arg(long, env = "CINDER_API_KEY", global = true, hide_env_values = true)]
    api_key: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "warn", global = true)]
    log_level: String,

    /// Print raw JSON instead of formatted output
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Submit a training job
    Submit(submit::SubmitArgs),

    /// Show a job's current status
    Status {
        job_id: String,
    },

    /// Show the tail of a job's output
    Logs {
        job_id: String,

        /// Number of trailing lines (server default: 1000)
        #[arg(long)]
        tail: Option<usize>,
    },

    /// Release a job's compute unit
    Cleanup {
        job_id: String,
    },

    /// List known jobs
    List,

    /// Wait until a job finishes
    ///
    /// Exits non-zero if the job failed or the timeout elapsed. On failure the
    /// last 100 log lines are printed.
    Wait {
        job_id: String,

        /// Seconds between status checks
        #[arg(long, default_value_t = 30)]
        interval: u64,

        /// Give up after this many seconds
        #[arg(long)]
        timeout: Option<u64>,

        /// Release the compute unit once the job is finished
        #[arg(long)]
        cleanup: bool,
    },
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let level = match args.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "error" => Level::ERROR,
        _ => Level::WARN,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .without_time()
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to initialise logging: {}", e);
    }

    if let Err(e) = run(args).await {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let client = ApiClient::new(&args.url, args.api_key)?;
    let json = args.json;

    match args.command {
        Command::Submit(submit_args) => submit::execute(&client, submit_args, json).await,
        Command::Status { job_id } => status::execute(&client, &job_id, json).await,
        Command::Logs { job_id, tail } => logs::execute(&client, &job_id, tail, json).await,
        Command::Cleanup { job_id } => cleanup::execute(&client, &job_id, json).await,
        Command::List => list::execute(&client, json).await,
        Command::Wait { job_id, interval, timeout, cleanup } => {
            let options = wait::WaitOptions {
                interval: Duration::from_secs(interval.max(1)),
                timeout: timeout.map(Duration::from_secs),
                cleanup,
            };
            wait::execute(&client, &job_id, &options, json).await
        }
    }
}
