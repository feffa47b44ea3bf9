//! Job status values and the query views built from them.
//!
//! Batches are never stored; [`BatchSummary`] is derived by scanning the
//! records that share a batch ID.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::job::{BatchId, JobRecord};

/// Job processing status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// File stored, not yet scheduled
    #[default]
    Uploaded,
    /// Assigned to a batch, waiting for the single renderer lane
    Pending,
    /// Renderer is running for this job
    Processing,
    /// Result artifact stored
    Completed,
    /// Job failed; `message` carries the cause
    Error,
}

impl JobStatus {
    /// Get string representation of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Uploaded => "uploaded",
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Error => "error",
        }
    }

    /// Check if this is a terminal state (no more updates expected).
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Error)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Result of a status query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StatusView {
    pub status: JobStatus,
    pub progress: u8,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_path: Option<PathBuf>,
}

/// Derived status of every job sharing a batch ID.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    pub batch_id: BatchId,
    pub total: usize,
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    /// True once every job in the batch is terminal
    pub is_complete: bool,
    /// Jobs in submission order
    pub jobs: Vec<JobRecord>,
}

impl BatchSummary {
    /// Build a summary from the batch's records.
    pub fn from_records(batch_id: BatchId, mut jobs: Vec<JobRecord>) -> Self {
        jobs.sort_by_key(|job| job.batch_position.unwrap_or(u32::MAX));

        let count = |status: JobStatus| jobs.iter().filter(|j| j.status == status).count();
        let pending = count(JobStatus::Pending);
        let processing = count(JobStatus::Processing);
        let completed = count(JobStatus::Completed);
        let failed = count(JobStatus::Error);

        Self {
            batch_id,
            total: jobs.len(),
            pending,
            processing,
            completed,
            failed,
            is_complete: !jobs.is_empty() && jobs.iter().all(JobRecord::is_terminal),
            jobs,
        }
    }
}
