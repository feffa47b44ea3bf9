//! Sky renderer CLI wrapper.
//!
//! This crate provides:
//! - The renderer's JSON descriptor and resolution policy
//! - Spawning the renderer with a hard deadline and stderr capture
//! - Locating the produced artifact and installing it at the canonical path

pub mod artifact;
pub mod command;
pub mod descriptor;
pub mod error;
pub mod fs_utils;
pub mod resolution;

pub use artifact::{canonical_output_path, Artifact, ArtifactLocator, ArtifactSource};
pub use command::{RenderOutput, RendererCommand, RendererRunner};
pub use descriptor::{InputMode, ModelSpec, RendererConfig, DESCRIPTOR_FILE_NAME};
pub use error::{RendererError, RendererResult};
pub use fs_utils::{copy_file, move_file, remove_dir_if_exists};
pub use resolution::{probe_image, Resolution, ResolutionPlan, IMAGE_OUTPUT_CAP, VIDEO_OUTPUT};
