//! Job-queue interface. The lease manager that extends job visibility and
//! re-enqueues timed-out jobs lives behind the real queue service; the
//! worker only prepares jobs and reports their completion status.

use thiserror::Error;

pub mod local;

pub use local::LocalJobQueue;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Success,
    Failure,
}

#[derive(Debug, Clone)]
pub struct PreparedJob {
    pub job_id: String,
    /// JSON job body.
    pub body: String,
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("unknown or unclaimed job: {0}")]
    UnknownJob(String),
}

pub trait JobQueue: Send + Sync {
    /// Claims the next pending job, if any.
    fn prepare_next_job(&self) -> Result<Option<PreparedJob>, QueueError>;

    /// Records the final status of a previously claimed job.
    fn mark_job_completed(&self, job_id: &str, status: JobStatus) -> Result<(), QueueError>;
}
