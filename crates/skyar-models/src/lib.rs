//! Shared data models for the SkyAR orchestrator.
//!
//! This crate provides Serde-serializable types for:
//! - Job records and their lifecycle
//! - Job status and batch summaries
//! - Media classification
//! - Sky templates and processing parameters

pub mod error;
pub mod job;
pub mod job_status;
pub mod media;
pub mod template;

// Re-export common types
pub use error::{ModelError, ModelResult};
pub use job::{BatchId, JobId, JobRecord, MAX_ESTIMATED_PROGRESS};
pub use job_status::{BatchSummary, JobStatus, StatusView};
pub use media::{FileType, IMAGE_EXTENSIONS, VIDEO_EXTENSIONS};
pub use template::{ProcessingParams, SkyTemplate};
