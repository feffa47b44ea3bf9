//! Job records and their lifecycle.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::error::{ModelError, ModelResult};
use crate::job_status::{JobStatus, StatusView};
use crate::media::FileType;
use crate::template::ProcessingParams;

/// Highest value the progress estimator may report; 100 is reserved for completion.
pub const MAX_ESTIMATED_PROGRESS: u8 = 99;

/// Unique identifier for a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Identifier shared by every job submitted together.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct BatchId(pub String);

impl BatchId {
    /// Generate a new random batch ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for BatchId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Persisted status object for one uploaded media item.
///
/// All state changes go through the transition methods below, which enforce
/// the lifecycle `uploaded -> pending -> processing -> completed | error`:
/// terminal states are written once, progress never decreases, and
/// `output_path` / `error` are only present in their matching terminal state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    /// Unique job ID
    pub id: JobId,

    /// Original upload filename
    pub filename: String,

    /// Current status
    pub status: JobStatus,

    /// Image or video
    pub file_type: FileType,

    /// Progress (0-100)
    #[serde(default)]
    pub progress: u8,

    /// Human-readable status text
    pub message: String,

    /// Where the uploaded file was stored
    pub input_path: PathBuf,

    /// Canonical result path (completed only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_path: Option<PathBuf>,

    /// Failure cause (error only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Batch this job was submitted with
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<BatchId>,

    /// Submission order inside the batch
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_position: Option<u32>,

    /// Parameters captured at submission time
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_params: Option<ProcessingParams>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    /// Create a freshly uploaded record.
    pub fn uploaded(
        filename: impl Into<String>,
        input_path: impl AsRef<Path>,
        file_type: FileType,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            filename: filename.into(),
            status: JobStatus::Uploaded,
            file_type,
            progress: 0,
            message: format!("{} uploaded successfully", file_type.title()),
            input_path: input_path.as_ref().to_path_buf(),
            output_path: None,
            error: None,
            batch_id: None,
            batch_position: None,
            processing_params: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Check if the record is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Attach the job to a batch and capture its processing parameters.
    ///
    /// Only an `uploaded` job can join a batch, so a job never has two owners.
    pub fn assign_to_batch(
        &mut self,
        batch_id: BatchId,
        position: u32,
        params: ProcessingParams,
        message: impl Into<String>,
    ) -> ModelResult<()> {
        self.guard(&[JobStatus::Uploaded], JobStatus::Pending)?;
        self.status = JobStatus::Pending;
        self.batch_id = Some(batch_id);
        self.batch_position = Some(position);
        self.processing_params = Some(params);
        self.message = message.into();
        self.touch();
        Ok(())
    }

    /// Transition `pending -> processing`.
    pub fn start_processing(&mut self, message: impl Into<String>) -> ModelResult<()> {
        self.guard(&[JobStatus::Pending], JobStatus::Processing)?;
        self.status = JobStatus::Processing;
        self.message = message.into();
        self.touch();
        Ok(())
    }

    /// Apply an estimated progress value.
    ///
    /// Returns `false` (and leaves the record untouched) when the job is not
    /// processing or the value would move progress backwards. Estimates are
    /// capped at [`MAX_ESTIMATED_PROGRESS`].
    pub fn advance_progress(&mut self, value: u8, message: impl Into<String>) -> bool {
        if self.status != JobStatus::Processing {
            return false;
        }
        let value = value.min(MAX_ESTIMATED_PROGRESS);
        if value < self.progress {
            return false;
        }
        self.progress = value;
        self.message = message.into();
        self.touch();
        true
    }

    /// Transition `processing -> completed`.
    pub fn complete(&mut self, output_path: impl AsRef<Path>) -> ModelResult<()> {
        self.guard(&[JobStatus::Processing], JobStatus::Completed)?;
        self.status = JobStatus::Completed;
        self.progress = 100;
        self.output_path = Some(output_path.as_ref().to_path_buf());
        self.message = "Sky replacement completed successfully!".to_string();
        self.touch();
        Ok(())
    }

    /// Transition `pending | processing -> error`.
    ///
    /// Progress is kept as-is so the observed sequence stays monotonic.
    pub fn fail(&mut self, cause: impl Into<String>) -> ModelResult<()> {
        self.guard(&[JobStatus::Pending, JobStatus::Processing], JobStatus::Error)?;
        let cause = cause.into();
        self.status = JobStatus::Error;
        self.message = format!("Processing failed: {}", cause);
        self.error = Some(cause);
        self.touch();
        Ok(())
    }

    /// Snapshot for upstream status queries.
    pub fn status_view(&self) -> StatusView {
        StatusView {
            status: self.status,
            progress: self.progress,
            message: self.message.clone(),
            output_path: self.output_path.clone(),
        }
    }

    fn guard(&self, allowed: &[JobStatus], to: JobStatus) -> ModelResult<()> {
        if allowed.contains(&self.status) {
            Ok(())
        } else {
            Err(ModelError::invalid_transition(&self.id, self.status, to))
        }
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
