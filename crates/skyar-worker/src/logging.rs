//! Structured job logging utilities.
//!
//! Keeps job lifecycle lines consistent: every line carries the job ID, the
//! operation and, when known, the batch.

use tracing::{error, info, warn, Span};

use skyar_models::{BatchId, JobId};

/// Job logger for structured logging with consistent formatting.
#[derive(Debug, Clone)]
pub struct JobLogger {
    job_id: String,
    batch_id: Option<String>,
    operation: String,
}

impl JobLogger {
    /// Create a new job logger for a specific job and operation.
    pub fn new(job_id: &JobId, operation: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            batch_id: None,
            operation: operation.to_string(),
        }
    }

    /// Attach the batch the job belongs to.
    pub fn with_batch(mut self, batch_id: Option<&BatchId>) -> Self {
        self.batch_id = batch_id.map(ToString::to_string);
        self
    }

    pub fn log_start(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            batch_id = self.batch_id.as_deref().unwrap_or("-"),
            operation = %self.operation,
            "Job started: {}", message
        );
    }

    pub fn log_progress(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            batch_id = self.batch_id.as_deref().unwrap_or("-"),
            operation = %self.operation,
            "Job progress: {}", message
        );
    }

    pub fn log_warning(&self, message: &str) {
        warn!(
            job_id = %self.job_id,
            batch_id = self.batch_id.as_deref().unwrap_or("-"),
            operation = %self.operation,
            "Job warning: {}", message
        );
    }

    pub fn log_error(&self, message: &str) {
        error!(
            job_id = %self.job_id,
            batch_id = self.batch_id.as_deref().unwrap_or("-"),
            operation = %self.operation,
            "Job error: {}", message
        );
    }

    pub fn log_completion(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            batch_id = self.batch_id.as_deref().unwrap_or("-"),
            operation = %self.operation,
            "Job completed: {}", message
        );
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Create a tracing span for this job.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "job",
            job_id = %self.job_id,
            batch_id = self.batch_id.as_deref().unwrap_or("-"),
            operation = %self.operation
        )
    }
}
