//! Durable state persistence.
//!
//! Jobs and results are stored under the logical keys `job:<job_id>` and
//! `result:<job_id>`. Writes block their caller until durable; results are
//! write-once. Records round-trip through the validated serde schemas, so
//! anything read back is as well-formed as what was written.

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use jobforge_core::{Job, JobResult};
use thiserror::Error;

/// Logical key for a job record.
#[must_use]
pub fn job_key(job_id: &str) -> String {
    format!("job:{job_id}")
}

/// Logical key for a result record.
#[must_use]
pub fn result_key(job_id: &str) -> String {
    format!("result:{job_id}")
}

/// Errors raised by a state store
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying I/O failure
    #[error("store io error: {0}")]
    Io(#[from] std::io::Error),

    /// A stored record failed to decode or validate
    #[error("corrupt record under '{key}': {reason}")]
    Corrupt {
        /// Logical key of the bad record.
        key: String,
        /// Decode or validation failure.
        reason: String,
    },

    /// Results are write-once
    #[error("result already recorded for job '{id}'")]
    ResultExists {
        /// The job whose result already exists.
        id: String,
    },
}

/// Store result type
pub type StoreResult<T = ()> = Result<T, StoreError>;

/// Keyed, durable, process-private persistence for jobs and results.
pub trait StateStore: Send + Sync {
    /// Persists a job record, replacing any previous version.
    ///
    /// # Errors
    ///
    /// I/O failures; the in-memory transition is only committed once this
    /// returns.
    fn put_job(&self, job: &Job) -> StoreResult;

    /// Reads a job record back.
    ///
    /// # Errors
    ///
    /// I/O failures or a corrupt record.
    fn get_job(&self, job_id: &str) -> StoreResult<Option<Job>>;

    /// Persists a result record, exactly once per job.
    ///
    /// # Errors
    ///
    /// [`StoreError::ResultExists`] on a second write for the same job; the
    /// stored value is left unchanged.
    fn put_result(&self, result: &JobResult) -> StoreResult;

    /// Reads a result record back.
    ///
    /// # Errors
    ///
    /// I/O failures or a corrupt record.
    fn get_result(&self, job_id: &str) -> StoreResult<Option<JobResult>>;

    /// Lists every persisted job record.
    ///
    /// # Errors
    ///
    /// I/O failures or a corrupt record.
    fn list_jobs(&self) -> StoreResult<Vec<Job>>;
}
