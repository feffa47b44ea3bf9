//! Model error types.

use thiserror::Error;

use crate::job::JobId;
use crate::job_status::JobStatus;

pub type ModelResult<T> = Result<T, ModelError>;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Job {job_id} cannot move from {from} to {to}")]
    InvalidTransition {
        job_id: JobId,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("Unknown sky template: {0}")]
    UnknownTemplate(String),

    #[error("Unsupported file type: {0}")]
    UnsupportedFileType(String),
}

impl ModelError {
    pub fn invalid_transition(job_id: &JobId, from: JobStatus, to: JobStatus) -> Self {
        Self::InvalidTransition {
            job_id: job_id.clone(),
            from,
            to,
        }
    }

    pub fn unsupported_file_type(name: impl Into<String>) -> Self {
        Self::UnsupportedFileType(name.into())
    }
}
