//! Locating the renderer's output and installing it at the canonical path.

use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

use skyar_models::{FileType, IMAGE_EXTENSIONS, VIDEO_EXTENSIONS};

use crate::error::{RendererError, RendererResult};
use crate::fs_utils::{copy_file, move_file};

/// Suffix the renderer gives composited stills.
const IMAGE_PRIMARY_SUFFIX: &str = "syneth.jpg";

/// Name fragments marking files the renderer writes alongside the result.
const AUXILIARY_MARKERS: &[&str] = &["input", "mask", "config"];

/// Stem of the canonical output file.
const CANONICAL_STEM: &str = "result";

/// Which search rule found the artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactSource {
    /// Matched the renderer's naming pattern in the output directory
    Primary,
    /// The renderer's fixed output file in its working directory
    WellKnown,
    /// Largest non-auxiliary media file in the output directory
    Largest,
}

/// A file produced by the renderer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub path: PathBuf,
    pub source: ArtifactSource,
}

impl Artifact {
    /// Put the artifact at `dest`.
    ///
    /// Files in the output directory are copied. The well-known file lives in
    /// the renderer's shared working directory and is moved so the next job
    /// cannot pick it up again.
    pub async fn install(&self, dest: impl AsRef<Path>) -> RendererResult<PathBuf> {
        let dest = dest.as_ref();
        if self.path == dest {
            return Ok(dest.to_path_buf());
        }
        match self.source {
            ArtifactSource::WellKnown => move_file(&self.path, dest).await?,
            ArtifactSource::Primary | ArtifactSource::Largest => copy_file(&self.path, dest).await?,
        }
        info!(
            from = %self.path.display(),
            to = %dest.display(),
            source = ?self.source,
            "Installed render artifact"
        );
        Ok(dest.to_path_buf())
    }

    /// Canonical destination inside `job_output_dir`.
    ///
    /// The artifact's own extension is kept so a fallback `.avi` or `.png`
    /// is not relabeled. Without one, the file type's default is used.
    pub fn canonical_path(&self, job_output_dir: impl AsRef<Path>, file_type: FileType) -> PathBuf {
        match self.path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) => job_output_dir
                .as_ref()
                .join(format!("{}.{}", CANONICAL_STEM, ext.to_lowercase())),
            None => canonical_output_path(job_output_dir, file_type),
        }
    }
}

/// Default output path for a job: `<job_output_dir>/result.<ext>`.
pub fn canonical_output_path(job_output_dir: impl AsRef<Path>, file_type: FileType) -> PathBuf {
    job_output_dir
        .as_ref()
        .join(format!("{}.{}", CANONICAL_STEM, file_type.result_extension()))
}

/// Searches for the renderer's artifact.
#[derive(Debug, Clone)]
pub struct ArtifactLocator {
    file_type: FileType,
    well_known: Option<PathBuf>,
}

impl ArtifactLocator {
    pub fn new(file_type: FileType) -> Self {
        Self {
            file_type,
            well_known: None,
        }
    }

    /// Fixed output file checked after the primary pattern. Only consulted
    /// for video jobs.
    pub fn with_well_known(mut self, path: impl Into<PathBuf>) -> Self {
        self.well_known = Some(path.into());
        self
    }

    /// Find the artifact in `output_dir`.
    pub async fn locate(&self, output_dir: impl AsRef<Path>) -> RendererResult<Artifact> {
        let output_dir = output_dir.as_ref();
        let entries = list_files(output_dir).await?;

        if let Some(path) = self.primary(&entries) {
            return Ok(Artifact {
                path,
                source: ArtifactSource::Primary,
            });
        }

        if self.file_type == FileType::Video {
            if let Some(path) = &self.well_known {
                if fs::try_exists(path).await.unwrap_or(false) {
                    return Ok(Artifact {
                        path: path.clone(),
                        source: ArtifactSource::WellKnown,
                    });
                }
            }
        }

        if let Some(path) = self.largest(&entries) {
            debug!(path = %path.display(), "Primary artifact missing, using largest candidate");
            return Ok(Artifact {
                path,
                source: ArtifactSource::Largest,
            });
        }

        let found = entries.iter().map(|e| e.name.clone()).collect();
        Err(RendererError::artifact_missing(output_dir, found))
    }

    fn primary(&self, entries: &[FileEntry]) -> Option<PathBuf> {
        entries
            .iter()
            .filter(|e| !e.is_canonical())
            .find(|e| match self.file_type {
                FileType::Image => e.lower_name.ends_with(IMAGE_PRIMARY_SUFFIX),
                FileType::Video => e.extension() == Some("mp4"),
            })
            .map(|e| e.path.clone())
    }

    fn largest(&self, entries: &[FileEntry]) -> Option<PathBuf> {
        let extensions = match self.file_type {
            FileType::Image => IMAGE_EXTENSIONS,
            FileType::Video => VIDEO_EXTENSIONS,
        };
        entries
            .iter()
            .filter(|e| !e.is_auxiliary())
            .filter(|e| e.extension().is_some_and(|ext| extensions.contains(&ext)))
            .max_by_key(|e| e.size)
            .map(|e| e.path.clone())
    }
}

#[derive(Debug)]
struct FileEntry {
    path: PathBuf,
    name: String,
    lower_name: String,
    size: u64,
}

impl FileEntry {
    fn extension(&self) -> Option<&str> {
        self.lower_name.rsplit_once('.').map(|(_, ext)| ext)
    }

    fn is_canonical(&self) -> bool {
        self.lower_name
            .rsplit_once('.')
            .is_some_and(|(stem, _)| stem == CANONICAL_STEM)
    }

    fn is_auxiliary(&self) -> bool {
        self.is_canonical()
            || AUXILIARY_MARKERS
                .iter()
                .any(|marker| self.lower_name.contains(marker))
    }
}

/// Regular files directly inside `dir`, sorted by name. A missing directory
/// is treated as empty.
async fn list_files(dir: &Path) -> RendererResult<Vec<FileEntry>> {
    let mut entries = Vec::new();
    let mut read_dir = match fs::read_dir(dir).await {
        Ok(rd) => rd,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(entries),
        Err(e) => return Err(e.into()),
    };

    while let Some(entry) = read_dir.next_entry().await? {
        let metadata = entry.metadata().await?;
        if !metadata.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        entries.push(FileEntry {
            path: entry.path(),
            lower_name: name.to_lowercase(),
            name,
            size: metadata.len(),
        });
    }

    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(entries)
}
