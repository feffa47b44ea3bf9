//! Worker error types.

use thiserror::Error;

use skyar_media::RendererError;
use skyar_models::{BatchId, JobId, ModelError};
use skyar_store::StoreError;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    #[error("Batch not found: {0}")]
    BatchNotFound(BatchId),

    #[error("Job {0} has no processing parameters")]
    MissingParams(JobId),

    #[error("Scheduler is shut down")]
    SchedulerClosed,

    #[error("Process probe failed: {0}")]
    ProbeFailed(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("{0}")]
    Renderer(#[from] RendererError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn probe_failed(msg: impl Into<String>) -> Self {
        Self::ProbeFailed(msg.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    /// Text recorded on a failed job.
    ///
    /// A renderer that exits non-zero reports its own stderr, which is more
    /// useful than the wrapper message.
    pub fn failure_cause(&self) -> String {
        match self {
            WorkerError::Renderer(RendererError::ProcessFailed { message, .. }) => message.clone(),
            other => other.to_string(),
        }
    }

    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            WorkerError::Renderer(RendererError::Timeout(_)) => "timeout",
            WorkerError::Renderer(RendererError::ProcessFailed { .. }) => "process_failed",
            WorkerError::Renderer(RendererError::ArtifactMissing { .. }) => "artifact_missing",
            WorkerError::Renderer(_) => "renderer",
            WorkerError::Store(_) => "store",
            WorkerError::Model(_) | WorkerError::MissingParams(_) => "invalid_job",
            _ => "other",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_failure_cause_prefers_stderr() {
        let err = WorkerError::from(RendererError::process_failed("segfault in matting\n", Some(139)));
        assert_eq!(err.failure_cause(), "segfault in matting");
        assert_eq!(err.kind(), "process_failed");
    }

    #[test]
    fn test_timeout_cause() {
        let err = WorkerError::from(RendererError::Timeout(Duration::from_secs(300)));
        assert_eq!(err.failure_cause(), "Processing timed out after 300 seconds");
        assert_eq!(err.kind(), "timeout");
    }
}
