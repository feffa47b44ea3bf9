//! Media file classification.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Accepted video extensions (lowercase, without dot).
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "avi", "mov", "mkv", "webm", "flv", "wmv"];

/// Accepted image extensions (lowercase, without dot).
pub const IMAGE_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "bmp", "tiff", "tif", "webp", "heic", "heif",
];

/// Kind of media a job processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum FileType {
    Image,
    Video,
}

impl FileType {
    /// Classify a filename by its extension (case-insensitive).
    pub fn from_path(path: impl AsRef<Path>) -> Option<Self> {
        let ext = path.as_ref().extension()?.to_str()?.to_lowercase();
        if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
            Some(FileType::Image)
        } else if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
            Some(FileType::Video)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FileType::Image => "image",
            FileType::Video => "video",
        }
    }

    /// Capitalized name for status messages.
    pub fn title(&self) -> &'static str {
        match self {
            FileType::Image => "Image",
            FileType::Video => "Video",
        }
    }

    /// Extension of the canonical result file.
    pub fn result_extension(&self) -> &'static str {
        match self {
            FileType::Image => "jpg",
            FileType::Video => "mp4",
        }
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_path() {
        assert_eq!(FileType::from_path("beach.JPG"), Some(FileType::Image));
        assert_eq!(FileType::from_path("/uploads/a.heic"), Some(FileType::Image));
        assert_eq!(FileType::from_path("drone.MOV"), Some(FileType::Video));
        assert_eq!(FileType::from_path("notes.txt"), None);
        assert_eq!(FileType::from_path("no_extension"), None);
    }

    #[test]
    fn test_result_extension() {
        assert_eq!(FileType::Image.result_extension(), "jpg");
        assert_eq!(FileType::Video.result_extension(), "mp4");
    }
}
