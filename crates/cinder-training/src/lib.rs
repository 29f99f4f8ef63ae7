//! Cinder Training
//!
//! Provider-agnostic training job primitives for:
//! - Accepting and validating training requests (`TrainingRequest` -> `TrainingJobSpec`)
//! - Server-side defaults for omitted hyperparameters
//! - Describing how the worker program sees its mounts and arguments (`WorkerLayout`)

pub mod error;
pub mod job;
pub mod layout;

pub use error::{TrainingError, TrainingResult};
pub use job::{
    TrainingDefaults, TrainingDevice, TrainingHyperParams, TrainingJobId, TrainingJobSpec,
    TrainingRequest,
};
pub use layout::WorkerLayout;
