use crate::error::{TrainingError, TrainingResult};
use serde::{Deserialize, Serialize};
use std::path::{Component, Path};
use uuid::Uuid;

/// Identifier for a training job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrainingJobId(pub String);

impl TrainingJobId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TrainingJobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TrainingJobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for TrainingJobId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Device the worker trains on: `cpu` or a GPU index such as `0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum TrainingDevice {
    Cpu,
    Gpu(u32),
}

impl TrainingDevice {
    #[must_use]
    pub fn is_gpu(&self) -> bool {
        matches!(self, Self::Gpu(_))
    }
}

impl std::str::FromStr for TrainingDevice {
    type Err = TrainingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("cpu") {
            return Ok(Self::Cpu);
        }
        s.parse::<u32>().map(Self::Gpu).map_err(|_| {
            TrainingError::invalid("device", format!("expected \"cpu\" or a GPU index, got {s:?}"))
        })
    }
}

impl TryFrom<String> for TrainingDevice {
    type Error = TrainingError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TrainingDevice> for String {
    fn from(value: TrainingDevice) -> Self {
        value.to_string()
    }
}

impl std::fmt::Display for TrainingDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cpu => write!(f, "cpu"),
            Self::Gpu(index) => write!(f, "{index}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainingHyperParams {
    pub epochs: u32,
    /// Early-stopping patience in epochs; 0 disables early stopping.
    pub patience: u32,
    pub batch: u32,
    pub imgsz: u32,
}

impl Default for TrainingHyperParams {
    fn default() -> Self {
        Self { epochs: 100, patience: 50, batch: 24, imgsz: 640 }
    }
}

pub const EPOCHS_RANGE: (i64, i64) = (1, 10_000);
pub const PATIENCE_RANGE: (i64, i64) = (0, 10_000);
pub const BATCH_RANGE: (i64, i64) = (1, 1024);
pub const IMGSZ_RANGE: (i64, i64) = (32, 4096);
/// Image sizes must be a multiple of the detector stride.
pub const IMGSZ_STRIDE: u32 = 32;

impl TrainingHyperParams {
    pub fn validate(&self) -> TrainingResult<()> {
        bounded("epochs", i64::from(self.epochs), EPOCHS_RANGE)?;
        bounded("patience", i64::from(self.patience), PATIENCE_RANGE)?;
        bounded("batch", i64::from(self.batch), BATCH_RANGE)?;
        bounded("imgsz", i64::from(self.imgsz), IMGSZ_RANGE)?;
        if self.imgsz % IMGSZ_STRIDE != 0 {
            return Err(TrainingError::invalid(
                "imgsz",
                format!("must be a multiple of {IMGSZ_STRIDE}, got {}", self.imgsz),
            ));
        }
        Ok(())
    }
}

/// Server-side defaults applied to fields a request leaves out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainingDefaults {
    #[serde(default = "default_epochs")]
    pub epochs: u32,
    #[serde(default = "default_patience")]
    pub patience: u32,
    #[serde(default = "default_batch")]
    pub batch: u32,
    #[serde(default = "default_imgsz")]
    pub imgsz: u32,
    #[serde(default = "default_device")]
    pub device: TrainingDevice,
}

fn default_epochs() -> u32 {
    TrainingHyperParams::default().epochs
}

fn default_patience() -> u32 {
    TrainingHyperParams::default().patience
}

fn default_batch() -> u32 {
    TrainingHyperParams::default().batch
}

fn default_imgsz() -> u32 {
    TrainingHyperParams::default().imgsz
}

fn default_device() -> TrainingDevice {
    TrainingDevice::Gpu(0)
}

impl Default for TrainingDefaults {
    fn default() -> Self {
        Self {
            epochs: default_epochs(),
            patience: default_patience(),
            batch: default_batch(),
            imgsz: default_imgsz(),
            device: default_device(),
        }
    }
}

impl TrainingDefaults {
    #[must_use]
    pub fn hyperparams(&self) -> TrainingHyperParams {
        TrainingHyperParams {
            epochs: self.epochs,
            patience: self.patience,
            batch: self.batch,
            imgsz: self.imgsz,
        }
    }
}

/// A submission as received from a caller, before validation.
///
/// Every field is optional here so that a missing field is reported with its
/// name instead of as a generic deserialization failure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingRequest {
    /// Dataset archive, relative to the dataset share.
    #[serde(default, alias = "coco_zip_path")]
    pub dataset: Option<String>,
    /// Base model weights, relative to the model share.
    #[serde(default, alias = "base", alias = "base_model_path")]
    pub base_model: Option<String>,
    /// Output directory, relative to the output share.
    #[serde(default)]
    pub output_dir: Option<String>,
    #[serde(default)]
    pub epochs: Option<i64>,
    #[serde(default)]
    pub patience: Option<i64>,
    #[serde(default)]
    pub batch: Option<i64>,
    #[serde(default)]
    pub imgsz: Option<i64>,
    #[serde(default)]
    pub device: Option<String>,
}

impl TrainingRequest {
    #[must_use]
    pub fn new(dataset: impl Into<String>, base_model: impl Into<String>) -> Self {
        Self {
            dataset: Some(dataset.into()),
            base_model: Some(base_model.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_epochs(mut self, epochs: i64) -> Self {
        self.epochs = Some(epochs);
        self
    }

    /// Validates the request and fills in defaults.
    ///
    /// Fields are checked in declaration order; the first failure is returned.
    pub fn resolve(self, defaults: &TrainingDefaults) -> TrainingResult<TrainingJobSpec> {
        let dataset = required_path("dataset", self.dataset)?;
        let base_model = required_path("base_model", self.base_model)?;
        let output_dir = self
            .output_dir
            .map(|dir| relative_path("output_dir", &dir))
            .transpose()?;

        let hyperparams = TrainingHyperParams {
            epochs: numeric("epochs", self.epochs, defaults.epochs, EPOCHS_RANGE)?,
            patience: numeric("patience", self.patience, defaults.patience, PATIENCE_RANGE)?,
            batch: numeric("batch", self.batch, defaults.batch, BATCH_RANGE)?,
            imgsz: numeric("imgsz", self.imgsz, defaults.imgsz, IMGSZ_RANGE)?,
        };
        hyperparams.validate()?;

        let device = match self.device {
            Some(device) => device.parse()?,
            None => defaults.device,
        };

        Ok(TrainingJobSpec { dataset, base_model, output_dir, hyperparams, device })
    }
}

/// A validated, immutable training job specification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainingJobSpec {
    pub dataset: String,
    pub base_model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<String>,
    pub hyperparams: TrainingHyperParams,
    pub device: TrainingDevice,
}

impl TrainingJobSpec {
    /// Output directory relative to the output share, defaulting to `tflite/<job_id>`.
    #[must_use]
    pub fn output_dir_for(&self, job_id: &TrainingJobId) -> String {
        self.output_dir.clone().unwrap_or_else(|| format!("tflite/{job_id}"))
    }
}

fn bounded(field: &str, value: i64, (min, max): (i64, i64)) -> TrainingResult<u32> {
    if value < min || value > max {
        return Err(TrainingError::invalid(
            field,
            format!("must be between {min} and {max}, got {value}"),
        ));
    }
    u32::try_from(value).map_err(|_| TrainingError::invalid(field, "out of range"))
}

fn numeric(field: &str, value: Option<i64>, default: u32, range: (i64, i64)) -> TrainingResult<u32> {
    bounded(field, value.unwrap_or_else(|| i64::from(default)), range)
}

fn required_path(field: &str, value: Option<String>) -> TrainingResult<String> {
    match value {
        Some(value) => relative_path(field, &value),
        None => Err(TrainingError::invalid(field, "is required")),
    }
}

/// Share-relative paths are joined onto mount points, so they must stay inside them.
fn relative_path(field: &str, value: &str) -> TrainingResult<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(TrainingError::invalid(field, "must not be empty"));
    }
    if value.contains('\0') {
        return Err(TrainingError::invalid(field, "must not contain NUL bytes"));
    }
    if value.starts_with('/') || value.starts_with('\\') {
        return Err(TrainingError::invalid(field, format!("must be a relative path, got {value:?}")));
    }
    for component in Path::new(value).components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            Component::ParentDir => {
                return Err(TrainingError::invalid(field, "must not contain '..'"));
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(TrainingError::invalid(
                    field,
                    format!("must be a relative path, got {value:?}"),
                ));
            }
        }
    }
    Ok(value.to_string())
}
