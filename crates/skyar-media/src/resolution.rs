//! Resolution policy for renderer inputs and outputs.

use serde::{Deserialize, Serialize};
use std::path::Path;

use skyar_models::FileType;

use crate::error::{RendererError, RendererResult};

/// Largest output the renderer is asked to produce for images (4K UHD).
pub const IMAGE_OUTPUT_CAP: Resolution = Resolution::new(3840, 2160);

/// Fixed output size for videos, chosen for throughput.
pub const VIDEO_OUTPUT: Resolution = Resolution::new(640, 360);

/// Images at or above this size get the high-detail processing plan.
const HIGH_RES_THRESHOLD: Resolution = Resolution::new(2560, 1440);

/// Width and height in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Scale down to fit inside `cap`, preserving aspect ratio, then force
    /// both dimensions even. Sizes already inside the cap keep their native
    /// dimensions (apart from the even rounding).
    pub fn fit_within(self, cap: Resolution) -> Resolution {
        let scaled = if self.width <= cap.width && self.height <= cap.height {
            self
        } else {
            let aspect = self.width as f64 / self.height.max(1) as f64;
            let cap_aspect = cap.width as f64 / cap.height as f64;
            if aspect > cap_aspect {
                Resolution::new(cap.width, (cap.width as f64 / aspect) as u32)
            } else {
                Resolution::new((cap.height as f64 * aspect) as u32, cap.height)
            }
        };
        scaled.even()
    }

    /// Round each dimension down to an even number (minimum 2).
    pub fn even(self) -> Resolution {
        let round = |v: u32| (v - v % 2).max(2);
        Resolution::new(round(self.width), round(self.height))
    }

    fn is_high_res(&self) -> bool {
        self.width >= HIGH_RES_THRESHOLD.width || self.height >= HIGH_RES_THRESHOLD.height
    }
}

/// Processing size, output size and skybox crop for one render.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolutionPlan {
    /// Size the segmentation network runs at
    pub processing: Resolution,
    /// Size of the produced frames
    pub output: Resolution,
    /// Fraction of the skybox kept by the center crop
    pub skybox_center_crop: f32,
}

impl ResolutionPlan {
    /// Plan for an image with the given native size.
    pub fn for_image(native: Resolution) -> Self {
        let output = native.fit_within(IMAGE_OUTPUT_CAP);
        if output.is_high_res() {
            Self {
                processing: Resolution::new(512, 512),
                output,
                skybox_center_crop: 0.8,
            }
        } else {
            Self {
                processing: Resolution::new(384, 384),
                output,
                skybox_center_crop: 0.6,
            }
        }
    }

    /// Plan for a video.
    pub fn for_video() -> Self {
        Self {
            processing: Resolution::new(384, 384),
            output: VIDEO_OUTPUT,
            skybox_center_crop: 0.5,
        }
    }

    /// Build the plan for an input file, probing images for their size.
    pub async fn for_input(path: impl AsRef<Path>, file_type: FileType) -> RendererResult<Self> {
        match file_type {
            FileType::Image => Ok(Self::for_image(probe_image(path).await?)),
            FileType::Video => Ok(Self::for_video()),
        }
    }
}

/// Read an image's native dimensions without decoding the pixels.
pub async fn probe_image(path: impl AsRef<Path>) -> RendererResult<Resolution> {
    let path = path.as_ref().to_path_buf();
    let probe_path = path.clone();
    let dims = tokio::task::spawn_blocking(move || image::image_dimensions(&probe_path))
        .await
        .map_err(|e| RendererError::Probe {
            path: path.clone(),
            message: e.to_string(),
        })?;

    let (width, height) = dims.map_err(|e| RendererError::Probe {
        path,
        message: e.to_string(),
    })?;
    Ok(Resolution::new(width, height))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_image_keeps_native_size() {
        let plan = ResolutionPlan::for_image(Resolution::new(1920, 1080));
        assert_eq!(plan.output, Resolution::new(1920, 1080));
        assert_eq!(plan.processing, Resolution::new(384, 384));
        assert!((plan.skybox_center_crop - 0.6).abs() < f32::EPSILON);
    }

    #[test]
    fn test_odd_dimensions_forced_even() {
        let out = Resolution::new(1001, 667).fit_within(IMAGE_OUTPUT_CAP);
        assert_eq!(out, Resolution::new(1000, 666));
    }

    #[test]
    fn test_wide_image_limited_by_width() {
        // 8000x3000 is wider than 16:9, so width hits the cap first
        let out = Resolution::new(8000, 3000).fit_within(IMAGE_OUTPUT_CAP);
        assert_eq!(out, Resolution::new(3840, 1440));
    }

    #[test]
    fn test_tall_image_limited_by_height() {
        let out = Resolution::new(3000, 6000).fit_within(IMAGE_OUTPUT_CAP);
        assert_eq!(out, Resolution::new(1080, 2160));
    }

    #[test]
    fn test_exactly_at_cap() {
        let out = Resolution::new(3840, 2160).fit_within(IMAGE_OUTPUT_CAP);
        assert_eq!(out, IMAGE_OUTPUT_CAP);
    }

    #[test]
    fn test_high_res_plan() {
        let plan = ResolutionPlan::for_image(Resolution::new(6000, 4000));
        assert_eq!(plan.output, Resolution::new(3240, 2160));
        assert_eq!(plan.processing, Resolution::new(512, 512));
        assert!((plan.skybox_center_crop - 0.8).abs() < f32::EPSILON);
    }

    #[test]
    fn test_video_plan_is_fixed() {
        let plan = ResolutionPlan::for_video();
        assert_eq!(plan.output, VIDEO_OUTPUT);
        assert!((plan.skybox_center_crop - 0.5).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn test_probe_missing_image() {
        let err = probe_image("/definitely/not/here.jpg").await.unwrap_err();
        assert!(matches!(err, RendererError::Probe { .. }));
    }
}
