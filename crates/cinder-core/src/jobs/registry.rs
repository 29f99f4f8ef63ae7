//! In-memory job registry with per-record locking.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use cinder_training::TrainingJobId;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use super::model::Job;

/// Shared handle to one job record.
pub type JobHandle = Arc<Mutex<Job>>;

/// Map of job id to record.
///
/// The map lock is only held to look records up or insert them; work on a job
/// happens under that job's own mutex.
#[derive(Default)]
pub struct JobRegistry {
    jobs: RwLock<HashMap<TrainingJobId, JobHandle>>,
}

impl fmt::Debug for JobRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobRegistry")
            .field("job_count", &self.jobs.try_read().map(|j| j.len()).unwrap_or(0))
            .finish_non_exhaustive()
    }
}

impl JobRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a record and returns it already locked.
    ///
    /// The lock is taken before the record is visible, so other callers wait
    /// for the owner to finish with it instead of seeing a half-initialised job.
    pub async fn insert_locked(&self, job: Job) -> OwnedMutexGuard<Job> {
        let id = job.job_id.clone();
        let handle = Arc::new(Mutex::new(job));
        let guard = Arc::clone(&handle).lock_owned().await;
        self.jobs.write().await.insert(id, handle);
        guard
    }

    pub async fn get(&self, id: &TrainingJobId) -> Option<JobHandle> {
        self.jobs.read().await.get(id).cloned()
    }

    /// All records, in no particular order.
    pub async fn all(&self) -> Vec<JobHandle> {
        self.jobs.read().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }
}
