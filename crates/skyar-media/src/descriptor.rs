//! Renderer configuration descriptor.
//!
//! The renderer reads a single JSON file describing the model, input, sky
//! template, resolutions and adjustment parameters. Keys follow the
//! renderer's own naming.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

use skyar_models::{FileType, ProcessingParams, SkyTemplate};

use crate::error::RendererResult;
use crate::resolution::ResolutionPlan;

/// File name of the descriptor inside a job's output directory.
pub const DESCRIPTOR_FILE_NAME: &str = "config.json";

/// How the renderer reads its input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputMode {
    /// A directory holding a frame sequence (single images are staged here)
    Seq,
    /// A video file
    Video,
}

impl From<FileType> for InputMode {
    fn from(file_type: FileType) -> Self {
        match file_type {
            FileType::Image => InputMode::Seq,
            FileType::Video => InputMode::Video,
        }
    }
}

/// Segmentation network and its checkpoint directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub net_g: String,
    pub checkpoint_dir: String,
}

impl Default for ModelSpec {
    fn default() -> Self {
        Self {
            net_g: "coord_resnet50".to_string(),
            checkpoint_dir: "./checkpoints_G_coord_resnet50".to_string(),
        }
    }
}

/// Descriptor handed to the renderer via `--path`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RendererConfig {
    #[serde(rename = "net_G")]
    pub net_g: String,
    pub ckptdir: String,
    pub input_mode: InputMode,
    pub datadir: PathBuf,
    pub skybox: String,
    pub in_size_w: u32,
    pub in_size_h: u32,
    pub out_size_w: u32,
    pub out_size_h: u32,
    pub skybox_center_crop: f32,
    pub auto_light_matching: bool,
    pub relighting_factor: f32,
    pub recoloring_factor: f32,
    pub halo_effect: bool,
    pub output_dir: PathBuf,
    pub save_jpgs: bool,
}

impl RendererConfig {
    /// Assemble the descriptor for one job.
    ///
    /// `datadir` is the staged sequence directory for images and the video
    /// file itself for videos.
    pub fn new(
        model: &ModelSpec,
        file_type: FileType,
        datadir: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
        plan: &ResolutionPlan,
        template: &SkyTemplate,
        params: &ProcessingParams,
    ) -> Self {
        Self {
            net_g: model.net_g.clone(),
            ckptdir: model.checkpoint_dir.clone(),
            input_mode: file_type.into(),
            datadir: datadir.into(),
            skybox: template.file.to_string(),
            in_size_w: plan.processing.width,
            in_size_h: plan.processing.height,
            out_size_w: plan.output.width,
            out_size_h: plan.output.height,
            skybox_center_crop: plan.skybox_center_crop,
            auto_light_matching: params.auto_light_matching,
            relighting_factor: params.relighting_factor,
            recoloring_factor: params.recoloring_factor,
            halo_effect: params.halo_effect,
            output_dir: output_dir.into(),
            save_jpgs: file_type == FileType::Image,
        }
    }

    /// Write the descriptor as pretty JSON into `dir`, returning its path.
    pub async fn write_to(&self, dir: impl AsRef<Path>) -> RendererResult<PathBuf> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir).await?;
        let path = dir.join(DESCRIPTOR_FILE_NAME);
        let body = serde_json::to_vec_pretty(self)?;
        fs::write(&path, body).await?;
        debug!(path = %path.display(), "Wrote renderer descriptor");
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolution::Resolution;
    use tempfile::TempDir;

    fn image_config(output_dir: &Path) -> RendererConfig {
        let params = ProcessingParams::default();
        let template = params.template().unwrap();
        RendererConfig::new(
            &ModelSpec::default(),
            FileType::Image,
            "/work/seq_abc",
            output_dir,
            &ResolutionPlan::for_image(Resolution::new(1200, 800)),
            template,
            &params,
        )
    }

    #[test]
    fn test_descriptor_keys() {
        let config = image_config(Path::new("/out/abc"));
        let value = serde_json::to_value(&config).unwrap();

        assert_eq!(value["net_G"], "coord_resnet50");
        assert_eq!(value["ckptdir"], "./checkpoints_G_coord_resnet50");
        assert_eq!(value["input_mode"], "seq");
        assert_eq!(value["datadir"], "/work/seq_abc");
        assert_eq!(value["skybox"], "bluesky1.jpg");
        assert_eq!(value["in_size_w"], 384);
        assert_eq!(value["out_size_w"], 1200);
        assert_eq!(value["out_size_h"], 800);
        assert_eq!(value["halo_effect"], true);
        assert_eq!(value["output_dir"], "/out/abc");
        assert_eq!(value["save_jpgs"], true);
    }

    #[test]
    fn test_video_descriptor() {
        let params = ProcessingParams::default();
        let config = RendererConfig::new(
            &ModelSpec::default(),
            FileType::Video,
            "/uploads/clip.mp4",
            "/out/v1",
            &ResolutionPlan::for_video(),
            params.template().unwrap(),
            &params,
        );
        assert_eq!(config.input_mode, InputMode::Video);
        assert!(!config.save_jpgs);
        assert_eq!((config.out_size_w, config.out_size_h), (640, 360));
    }

    #[tokio::test]
    async fn test_write_descriptor() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("job-1");
        let config = image_config(&out);

        let path = config.write_to(&out).await.unwrap();
        assert_eq!(path, out.join(DESCRIPTOR_FILE_NAME));

        let raw = fs::read(&path).await.unwrap();
        let parsed: RendererConfig = serde_json::from_slice(&raw).unwrap();
        assert_eq!(parsed, config);
    }
}
