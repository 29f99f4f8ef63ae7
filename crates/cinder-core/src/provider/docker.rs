//! Docker container-based compute units.
//!
//! Drives the local `docker` CLI. The unit name doubles as the provider handle.

use std::process::Output;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, warn};

use super::error::{ProviderError, Result};
use super::unit::{Inspection, ProviderHandle, ProvisioningState, RawUnitState, RunState, UnitSpec};
use super::ResourceProvider;
use crate::config::DockerConfig;

/// Docker-based provider.
pub struct DockerProvider {
    config: DockerConfig,
}

impl DockerProvider {
    #[must_use]
    pub fn new(config: DockerConfig) -> Self {
        Self { config }
    }

    /// Returns the client version string, verifying the CLI is on `PATH`.
    pub async fn version(&self) -> Result<String> {
        let output = self.docker(&["--version".to_string()]).await?;
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    fn volume_source(&self, name: &str) -> Option<&str> {
        match name {
            "datasets" => Some(&self.config.datasets_dir),
            "models" => Some(&self.config.models_dir),
            "outputs" => Some(&self.config.outputs_dir),
            _ => None,
        }
    }

    /// Builds the `docker run` argument list for a unit.
    fn build_run_args(&self, spec: &UnitSpec) -> Result<Vec<String>> {
        let mut args = vec![
            "run".to_string(),
            "-d".to_string(),
            "--name".to_string(),
            spec.name.clone(),
            "--restart".to_string(),
            "no".to_string(),
        ];

        for (key, value) in &spec.labels {
            args.push("--label".to_string());
            args.push(format!("{}={}", key, value));
        }

        for (key, value) in &spec.env {
            args.push("-e".to_string());
            args.push(format!("{}={}", key, value));
        }

        for mount in &spec.mounts {
            let source = self.volume_source(&mount.name).ok_or_else(|| {
                ProviderError::Allocation(format!("no host directory configured for volume '{}'", mount.name))
            })?;
            let mut volume = format!("{}:{}", source, mount.mount_path);
            if mount.read_only {
                volume.push_str(":ro");
            }
            args.push("-v".to_string());
            args.push(volume);
        }

        args.push("--cpus".to_string());
        args.push(spec.resources.cpu.to_string());
        args.push("--memory".to_string());
        args.push(format!("{}m", (spec.resources.memory_gb * 1024.0).round() as u64));
        if let Some(ref gpu) = spec.resources.gpu {
            args.push("--gpus".to_string());
            args.push(gpu.count.to_string());
        }

        args.push(spec.image.clone());
        args.extend(spec.args.iter().cloned());
        Ok(args)
    }

    async fn docker(&self, args: &[String]) -> Result<Output> {
        debug!(binary = %self.config.binary, ?args, "Running docker command");
        Command::new(&self.config.binary).args(args).output().await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ProviderError::Unavailable(format!("{} not found: {}", self.config.binary, e))
            } else {
                ProviderError::Io(e)
            }
        })
    }
}

#[async_trait]
impl ResourceProvider for DockerProvider {
    fn kind(&self) -> &'static str {
        "docker"
    }

    async fn allocate(&self, spec: &UnitSpec) -> Result<ProviderHandle> {
        let args = self.build_run_args(spec)?;
        let output = self.docker(&args).await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            // `docker run` can create the container and then fail to start it.
            let cleanup = self
                .docker(&["rm".to_string(), "-f".to_string(), spec.name.clone()])
                .await;
            if let Err(e) = cleanup {
                warn!(unit = %spec.name, error = %e, "Failed to remove container after failed run");
            }
            return Err(ProviderError::Allocation(stderr));
        }

        let container_id = String::from_utf8_lossy(&output.stdout).trim().to_string();
        debug!(unit = %spec.name, container_id = %container_id, "Container started");
        Ok(ProviderHandle(spec.name.clone()))
    }

    async fn inspect(&self, handle: &ProviderHandle) -> Result<Inspection> {
        let output = self
            .docker(&[
                "inspect".to_string(),
                "--type".to_string(),
                "container".to_string(),
                "--format".to_string(),
                "{{json .State}}".to_string(),
                handle.0.clone(),
            ])
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if is_missing(&stderr) {
                return Ok(Inspection::NotFound);
            }
            return Err(ProviderError::Inspect(stderr.trim().to_string()));
        }

        let state = parse_state(&String::from_utf8_lossy(&output.stdout))?;
        Ok(Inspection::Present(state))
    }

    async fn fetch_logs(&self, handle: &ProviderHandle, tail: usize) -> Result<String> {
        let output = self
            .docker(&[
                "logs".to_string(),
                "--timestamps".to_string(),
                "--tail".to_string(),
                tail.to_string(),
                handle.0.clone(),
            ])
            .await?;

        if !output.status.success() {
            return Err(ProviderError::Logs(String::from_utf8_lossy(&output.stderr).trim().to_string()));
        }

        Ok(merge_timestamped(
            &String::from_utf8_lossy(&output.stdout),
            &String::from_utf8_lossy(&output.stderr),
            tail,
        ))
    }

    async fn release(&self, handle: &ProviderHandle) -> Result<()> {
        let output = self.docker(&["rm".to_string(), "-f".to_string(), handle.0.clone()]).await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if is_missing(&stderr) {
                warn!(handle = %handle, "Container already gone at release");
                return Ok(());
            }
            return Err(ProviderError::Release(stderr.trim().to_string()));
        }
        Ok(())
    }
}

/// Subset of `docker inspect`'s `.State` object.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DockerState {
    status: String,
    #[serde(default)]
    exit_code: Option<i64>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default, rename = "OOMKilled")]
    oom_killed: bool,
}

fn parse_state(json: &str) -> Result<RawUnitState> {
    let state: DockerState = serde_json::from_str(json.trim())?;

    let detail = if state.oom_killed {
        Some("container was killed: out of memory".to_string())
    } else {
        state.error.filter(|e| !e.is_empty())
    };

    let (provisioning, run, exit_code) = match state.status.as_str() {
        "created" => (ProvisioningState::Pending, None, None),
        "running" => (ProvisioningState::Succeeded, Some(RunState::Running), None),
        "restarting" => (ProvisioningState::Succeeded, Some(RunState::Waiting), None),
        "exited" | "dead" => (ProvisioningState::Succeeded, Some(RunState::Terminated), state.exit_code),
        other => (ProvisioningState::Succeeded, Some(RunState::Other(other.to_string())), None),
    };

    Ok(RawUnitState { provisioning, run, exit_code, detail })
}

fn is_missing(stderr: &str) -> bool {
    stderr.contains("No such container") || stderr.contains("No such object")
}

/// Interleaves `docker logs --timestamps` stdout and stderr by timestamp and
/// strips the timestamps. Lines without a parseable timestamp stay after their
/// predecessor.
fn merge_timestamped(stdout: &str, stderr: &str, tail: usize) -> String {
    fn keyed(text: &str) -> Vec<(Option<DateTime<FixedOffset>>, &str)> {
        let mut last = None;
        text.lines()
            .map(|line| match line.split_once(' ') {
                Some((ts, rest)) => match DateTime::parse_from_rfc3339(ts) {
                    Ok(parsed) => {
                        last = Some(parsed);
                        (last, rest)
                    }
                    Err(_) => (last, line),
                },
                None => match DateTime::parse_from_rfc3339(line) {
                    Ok(parsed) => {
                        last = Some(parsed);
                        (last, "")
                    }
                    Err(_) => (last, line),
                },
            })
            .collect()
    }

    let mut lines = keyed(stdout);
    lines.extend(keyed(stderr));
    lines.sort_by_key(|(ts, _)| *ts);

    let skip = lines.len().saturating_sub(tail);
    let mut out = lines.into_iter().skip(skip).map(|(_, line)| line).collect::<Vec<_>>().join("\n");
    if !out.is_empty() {
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::unit::{GpuRequest, UnitResources, VolumeMount};
    use std::collections::BTreeMap;

    fn provider() -> DockerProvider {
        DockerProvider::new(DockerConfig {
            binary: "docker".to_string(),
            datasets_dir: "/srv/datasets".to_string(),
            models_dir: "/srv/models".to_string(),
            outputs_dir: "/srv/outputs".to_string(),
        })
    }

    fn unit() -> UnitSpec {
        let mut env = BTreeMap::new();
        env.insert("JOB_ID".to_string(), "j1".to_string());
        let mut labels = BTreeMap::new();
        labels.insert("purpose".to_string(), "yolo-training".to_string());
        UnitSpec {
            name: "training-j1".to_string(),
            image: "trainer:latest".to_string(),
            args: vec!["--epochs".to_string(), "5".to_string()],
            env,
            labels,
            mounts: vec![
                VolumeMount { name: "datasets".to_string(), mount_path: "/mnt/datasets".to_string(), read_only: true },
                VolumeMount { name: "outputs".to_string(), mount_path: "/mnt/outputs".to_string(), read_only: false },
            ],
            resources: UnitResources {
                cpu: 4.0,
                memory_gb: 16.0,
                gpu: Some(GpuRequest { count: 1, sku: "K80".to_string() }),
            },
        }
    }

    #[test]
    fn test_docker_build_run_args() {
        let args = provider().build_run_args(&unit()).unwrap();

        assert_eq!(&args[..4], &["run", "-d", "--name", "training-j1"]);
        assert!(args.contains(&"JOB_ID=j1".to_string()));
        assert!(args.contains(&"purpose=yolo-training".to_string()));
        assert!(args.contains(&"/srv/datasets:/mnt/datasets:ro".to_string()));
        assert!(args.contains(&"/srv/outputs:/mnt/outputs".to_string()));
        assert!(args.contains(&"16384m".to_string()));
        assert!(args.contains(&"--gpus".to_string()));

        // Image comes right before the worker arguments.
        let image_idx = args.iter().position(|a| a == "trainer:latest").unwrap();
        assert_eq!(&args[image_idx + 1..], &["--epochs", "5"]);
    }

    #[test]
    fn test_docker_build_run_args_rejects_unknown_volume() {
        let mut spec = unit();
        spec.mounts.push(VolumeMount { name: "scratch".to_string(), mount_path: "/tmp/x".to_string(), read_only: false });
        match provider().build_run_args(&spec) {
            Err(ProviderError::Allocation(msg)) => assert!(msg.contains("scratch")),
            other => panic!("Expected allocation error, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_state_variants() {
        let created = parse_state(r#"{"Status":"created","ExitCode":0}"#).unwrap();
        assert_eq!(created.provisioning, ProvisioningState::Pending);

        let running = parse_state(r#"{"Status":"running","Running":true,"ExitCode":0}"#).unwrap();
        assert_eq!(running.run, Some(RunState::Running));
        assert_eq!(running.exit_code, None);

        let exited = parse_state(r#"{"Status":"exited","ExitCode":137,"OOMKilled":true,"Error":""}"#).unwrap();
        assert_eq!(exited.run, Some(RunState::Terminated));
        assert_eq!(exited.exit_code, Some(137));
        assert!(exited.detail.unwrap().contains("out of memory"));

        let paused = parse_state(r#"{"Status":"paused","ExitCode":0}"#).unwrap();
        assert_eq!(paused.run, Some(RunState::Other("paused".to_string())));
    }

    #[test]
    fn test_oom_kill_reaches_failure_reason() {
        use crate::jobs::{project, JobStatus};

        let state = parse_state(r#"{"Status":"exited","ExitCode":137,"OOMKilled":true}"#).unwrap();
        let projection = project(JobStatus::Running, &Inspection::Present(state));
        assert_eq!(projection.reason.as_deref(), Some("exit code 137: container was killed: out of memory"));
    }

    #[test]
    fn test_parse_state_rejects_garbage() {
        assert!(matches!(parse_state("not json"), Err(ProviderError::Json(_))));
    }

    #[test]
    fn test_is_missing() {
        assert!(is_missing("Error: No such container: training-j1"));
        assert!(is_missing("Error: No such object: training-j1"));
        assert!(!is_missing("Cannot connect to the Docker daemon"));
    }

    #[test]
    fn test_merge_timestamped_orders_streams_and_applies_tail() {
        let stdout = "2024-05-01T10:00:00.1Z epoch 1\n2024-05-01T10:00:02.123456789Z epoch 2\n";
        let stderr = "2024-05-01T10:00:01.5Z warning: slow dataloader\n";

        let merged = merge_timestamped(stdout, stderr, 10);
        assert_eq!(merged, "epoch 1\nwarning: slow dataloader\nepoch 2\n");

        let tailed = merge_timestamped(stdout, stderr, 1);
        assert_eq!(tailed, "epoch 2\n");
    }

    #[test]
    fn test_merge_timestamped_empty() {
        assert_eq!(merge_timestamped("", "", 100), "");
    }
}
