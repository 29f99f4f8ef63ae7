//! Training job tracking.
//!
//! - `model`: job records, statuses and the views returned to callers
//! - `projector`: raw provider state to job status
//! - `registry`: the in-memory job table
//! - `template`: training spec to provider unit spec
//! - `orchestrator`: the submit / status / logs / cleanup operations

pub mod model;
pub mod orchestrator;
pub mod projector;
pub mod registry;
pub mod template;

pub use model::{Job, JobStatus, JobView};
pub use orchestrator::{JobOrchestrator, OrchestratorError, Result, DEFAULT_LOG_TAIL, MAX_LOG_TAIL};
pub use projector::{project, Projection, RESOURCE_DISAPPEARED};
pub use registry::{JobHandle, JobRegistry};
pub use template::UnitTemplate;
