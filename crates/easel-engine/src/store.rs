use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;

use crate::job::{GenerationJob, JobId};

/// Job persistence errors
#[derive(Debug, Error)]
pub enum StoreError {
    /// No record exists for the id
    #[error("job not found: {0}")]
    NotFound(JobId),
    /// Underlying storage failed
    #[error("job store backend: {0}")]
    Backend(String),
}

/// Durable storage for job records
///
/// The engine persists a snapshot on every state transition and reads back
/// on cold queries. Writes for distinct ids may be concurrent; transitions
/// for a single id are already serialized because exactly one worker owns a
/// job from `running` to its terminal state. Retention and deletion belong
/// to the store, never the engine.
#[async_trait]
pub trait JobStateStore: Send + Sync {
    /// Write a snapshot, replacing any previous one for the same id
    async fn persist(&self, job: &GenerationJob) -> Result<(), StoreError>;

    /// Read the latest snapshot for an id
    async fn load(&self, id: JobId) -> Result<GenerationJob, StoreError>;
}

/// In-memory job store
#[derive(Default)]
pub struct MemoryJobStore {
    records: DashMap<JobId, GenerationJob>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStateStore for MemoryJobStore {
    async fn persist(&self, job: &GenerationJob) -> Result<(), StoreError> {
        self.records.insert(job.id, job.clone());
        Ok(())
    }

    async fn load(&self, id: JobId) -> Result<GenerationJob, StoreError> {
        self.records
            .get(&id)
            .map(|record| record.clone())
            .ok_or(StoreError::NotFound(id))
    }
}
