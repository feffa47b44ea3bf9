//! Store error types.

use std::path::PathBuf;
use thiserror::Error;

use skyar_models::JobId;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to access snapshot '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Snapshot '{path}' is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Unsupported snapshot version {0}")]
    UnsupportedVersion(u32),

    #[error("Job already exists: {0}")]
    DuplicateId(JobId),

    #[error("Job not found: {0}")]
    JobNotFound(JobId),
}

impl StoreError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
