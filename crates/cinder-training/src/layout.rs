use crate::job::{TrainingJobId, TrainingJobSpec};
use serde::{Deserialize, Serialize};

/// Where the worker container sees its inputs and outputs.
///
/// Default layout mounts three shares under `/mnt/{datasets,models,outputs}` and
/// keeps intermediate data in `/app/workdir` inside the container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerLayout {
    pub datasets_mount: String,
    pub models_mount: String,
    pub outputs_mount: String,
    pub work_dir: String,
}

impl Default for WorkerLayout {
    fn default() -> Self {
        Self {
            datasets_mount: "/mnt/datasets".to_string(),
            models_mount: "/mnt/models".to_string(),
            outputs_mount: "/mnt/outputs".to_string(),
            work_dir: "/app/workdir".to_string(),
        }
    }
}

impl WorkerLayout {
    #[must_use]
    pub fn dataset_path(&self, spec: &TrainingJobSpec) -> String {
        join(&self.datasets_mount, &spec.dataset)
    }

    #[must_use]
    pub fn base_model_path(&self, spec: &TrainingJobSpec) -> String {
        join(&self.models_mount, &spec.base_model)
    }

    #[must_use]
    pub fn output_path(&self, job_id: &TrainingJobId, spec: &TrainingJobSpec) -> String {
        join(&self.outputs_mount, &spec.output_dir_for(job_id))
    }

    /// Command-line arguments for the worker program.
    #[must_use]
    pub fn worker_args(&self, job_id: &TrainingJobId, spec: &TrainingJobSpec) -> Vec<String> {
        let hp = &spec.hyperparams;
        vec![
            "--coco-zip".to_string(),
            self.dataset_path(spec),
            "--base-model".to_string(),
            self.base_model_path(spec),
            "--work-dir".to_string(),
            self.work_dir.clone(),
            "--tflite-out-dir".to_string(),
            self.output_path(job_id, spec),
            "--epochs".to_string(),
            hp.epochs.to_string(),
            "--patience".to_string(),
            hp.patience.to_string(),
            "--batch".to_string(),
            hp.batch.to_string(),
            "--imgsz".to_string(),
            hp.imgsz.to_string(),
            "--device".to_string(),
            spec.device.to_string(),
        ]
    }
}

fn join(mount: &str, relative: &str) -> String {
    let relative = relative.trim_start_matches("./");
    format!("{}/{}", mount.trim_end_matches('/'), relative)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{TrainingDefaults, TrainingDevice, TrainingRequest};

    fn spec() -> TrainingJobSpec {
        let mut request = TrainingRequest::new("retail/v1.zip", "yolo11n-seg.pt").with_epochs(5);
        request.device = Some("cpu".to_string());
        request.resolve(&TrainingDefaults::default()).unwrap()
    }

    #[test]
    fn test_layout_paths() {
        let layout = WorkerLayout::default();
        let id = TrainingJobId("job-1".to_string());
        let spec = spec();

        assert_eq!(layout.dataset_path(&spec), "/mnt/datasets/retail/v1.zip");
        assert_eq!(layout.base_model_path(&spec), "/mnt/models/yolo11n-seg.pt");
        assert_eq!(layout.output_path(&id, &spec), "/mnt/outputs/tflite/job-1");
    }

    #[test]
    fn test_worker_args_carry_every_hyperparameter() {
        let layout = WorkerLayout::default();
        let id = TrainingJobId("job-1".to_string());
        let spec = spec();
        let args = layout.worker_args(&id, &spec);

        let value_of = |flag: &str| {
            let idx = args.iter().position(|a| a == flag).unwrap();
            args[idx + 1].clone()
        };
        assert_eq!(value_of("--epochs"), "5");
        assert_eq!(value_of("--patience"), "50");
        assert_eq!(value_of("--batch"), "24");
        assert_eq!(value_of("--imgsz"), "640");
        assert_eq!(value_of("--device"), TrainingDevice::Cpu.to_string());
        assert_eq!(value_of("--work-dir"), "/app/workdir");
    }

    #[test]
    fn test_join_tolerates_trailing_slash_and_dot_prefix() {
        assert_eq!(join("/mnt/models/", "./m1.pt"), "/mnt/models/m1.pt");
    }
}
