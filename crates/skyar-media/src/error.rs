//! Error types for renderer operations.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type for renderer operations.
pub type RendererResult<T> = Result<T, RendererError>;

/// Errors that can occur while preparing, running or collecting a render.
#[derive(Debug, Error)]
pub enum RendererError {
    #[error("Renderer executable not found: {0}")]
    NotFound(String),

    #[error("Processing timed out after {} seconds", .0.as_secs())]
    Timeout(Duration),

    #[error("Renderer failed: {message}")]
    ProcessFailed {
        message: String,
        stderr: Option<String>,
        exit_code: Option<i32>,
    },

    #[error("Renderer produced no output in {}", dir.display())]
    ArtifactMissing { dir: PathBuf, found: Vec<String> },

    #[error("Failed to read image dimensions of {}: {message}", path.display())]
    Probe { path: PathBuf, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RendererError {
    /// Create a process failure from a non-zero exit.
    pub fn process_failed(stderr: impl Into<String>, exit_code: Option<i32>) -> Self {
        let stderr = stderr.into();
        let trimmed = stderr.trim();
        let message = if trimmed.is_empty() {
            match exit_code {
                Some(code) => format!("renderer exited with code {}", code),
                None => "renderer was terminated by a signal".to_string(),
            }
        } else {
            trimmed.to_string()
        };
        Self::ProcessFailed {
            message,
            stderr: Some(stderr).filter(|s| !s.is_empty()),
            exit_code,
        }
    }

    pub fn artifact_missing(dir: impl Into<PathBuf>, found: Vec<String>) -> Self {
        Self::ArtifactMissing {
            dir: dir.into(),
            found,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, RendererError::Timeout(_))
    }
}
