//! Translates a validated training spec into a provider unit spec.

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use cinder_training::{TrainingJobId, TrainingJobSpec, WorkerLayout};

use crate::config::ProviderConfig;
use crate::provider::{UnitResources, UnitSpec, VolumeMount};

/// Label stamped on every unit so they can be found on the platform.
pub const PURPOSE_LABEL: &str = "yolo-training";

/// Per-deployment settings shared by every unit.
#[derive(Debug, Clone)]
pub struct UnitTemplate {
    image: String,
    resources: UnitResources,
    layout: WorkerLayout,
}

impl UnitTemplate {
    #[must_use]
    pub fn from_config(config: &ProviderConfig) -> Self {
        Self {
            image: config.image.clone(),
            resources: UnitResources { cpu: config.cpu, memory_gb: config.memory_gb, gpu: config.gpu.clone() },
            layout: config.layout.clone(),
        }
    }

    /// Unit name for a job; also what providers use as the handle.
    #[must_use]
    pub fn unit_name(job_id: &TrainingJobId) -> String {
        format!("training-{}", job_id)
    }

    #[must_use]
    pub fn render(&self, job_id: &TrainingJobId, spec: &TrainingJobSpec, started_at: DateTime<Utc>) -> UnitSpec {
        let started_at = started_at.to_rfc3339_opts(SecondsFormat::Secs, true);

        let env = BTreeMap::from([
            ("JOB_ID".to_string(), job_id.to_string()),
            ("STARTED_AT".to_string(), started_at.clone()),
        ]);
        let labels = BTreeMap::from([
            ("job_id".to_string(), job_id.to_string()),
            ("purpose".to_string(), PURPOSE_LABEL.to_string()),
            ("created_at".to_string(), started_at),
        ]);

        let mounts = vec![
            VolumeMount { name: "datasets".to_string(), mount_path: self.layout.datasets_mount.clone(), read_only: true },
            VolumeMount { name: "models".to_string(), mount_path: self.layout.models_mount.clone(), read_only: true },
            VolumeMount { name: "outputs".to_string(), mount_path: self.layout.outputs_mount.clone(), read_only: false },
        ];

        // CPU-only jobs do not hold a GPU
        let mut resources = self.resources.clone();
        if !spec.device.is_gpu() {
            resources.gpu = None;
        }

        UnitSpec {
            name: Self::unit_name(job_id),
            image: self.image.clone(),
            args: self.layout.worker_args(job_id, spec),
            env,
            labels,
            mounts,
            resources,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::GpuRequest;
    use chrono::TimeZone;
    use cinder_training::{TrainingDefaults, TrainingRequest};

    fn config() -> ProviderConfig {
        ProviderConfig {
            gpu: Some(GpuRequest { count: 1, sku: "K80".to_string() }),
            ..ProviderConfig::default()
        }
    }

    fn started() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_render_unit() {
        let id = TrainingJobId::from("abc");
        let spec = TrainingRequest::new("d1.zip", "m1.pt").with_epochs(5).resolve(&TrainingDefaults::default()).unwrap();
        let unit = UnitTemplate::from_config(&config()).render(&id, &spec, started());

        assert_eq!(unit.name, "training-abc");
        assert_eq!(unit.image, "cinder-trainer:latest");
        assert_eq!(unit.env["JOB_ID"], "abc");
        assert_eq!(unit.env["STARTED_AT"], "2024-03-01T12:00:00Z");
        assert_eq!(unit.labels["purpose"], PURPOSE_LABEL);
        assert_eq!(unit.labels["job_id"], "abc");
        assert_eq!(unit.mounts.len(), 3);
        assert!(unit.mounts.iter().filter(|m| m.name != "outputs").all(|m| m.read_only));
        assert!(unit.mounts.iter().any(|m| m.name == "outputs" && !m.read_only));
        assert_eq!(unit.resources.gpu.as_ref().map(|g| g.count), Some(1));

        let epochs = unit.args.iter().position(|a| a == "--epochs").unwrap();
        assert_eq!(unit.args[epochs + 1], "5");
        assert!(unit.args.contains(&"/mnt/datasets/d1.zip".to_string()));
    }

    #[test]
    fn test_cpu_job_drops_gpu_request() {
        let id = TrainingJobId::from("abc");
        let mut request = TrainingRequest::new("d1.zip", "m1.pt");
        request.device = Some("cpu".to_string());
        let spec = request.resolve(&TrainingDefaults::default()).unwrap();

        let unit = UnitTemplate::from_config(&config()).render(&id, &spec, started());
        assert!(unit.resources.gpu.is_none());
    }
}
