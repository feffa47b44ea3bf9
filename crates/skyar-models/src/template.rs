//! Sky templates and per-job processing parameters.

use rand::Rng;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::{ModelError, ModelResult};

/// A replacement sky the renderer can composite in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, JsonSchema)]
pub struct SkyTemplate {
    /// Stable identifier stored in job parameters
    pub id: &'static str,
    /// Display name used in status messages
    pub name: &'static str,
    pub description: &'static str,
    /// Skybox image the renderer loads
    pub file: &'static str,
}

impl SkyTemplate {
    /// Every template, in catalog order.
    pub const ALL: &'static [SkyTemplate] = &[
        SkyTemplate {
            id: "bluesky1",
            name: "Blue Sky with Clouds",
            description: "Natural blue sky with white clouds",
            file: "bluesky1.jpg",
        },
        SkyTemplate {
            id: "bluesky2",
            name: "Clear Blue Sky",
            description: "Clear blue sky with wispy clouds",
            file: "bluesky2.jpg",
        },
        SkyTemplate {
            id: "bluesky3",
            name: "Cloudy Blue Sky",
            description: "Blue sky with scattered clouds",
            file: "bluesky3.jpg",
        },
        SkyTemplate {
            id: "bluesky4",
            name: "Serene Blue Sky",
            description: "Peaceful blue sky gradient",
            file: "bluesky4.jpg",
        },
    ];

    /// Look up a template by ID.
    pub fn find(id: &str) -> ModelResult<&'static SkyTemplate> {
        Self::ALL
            .iter()
            .find(|t| t.id == id)
            .ok_or_else(|| ModelError::UnknownTemplate(id.to_string()))
    }

    /// First template in the catalog.
    pub fn default_template() -> &'static SkyTemplate {
        &Self::ALL[0]
    }

    /// Pick a template uniformly at random.
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> &'static SkyTemplate {
        &Self::ALL[rng.random_range(0..Self::ALL.len())]
    }
}

/// Renderer adjustments captured when a job is submitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ProcessingParams {
    /// Template ID (see [`SkyTemplate::ALL`])
    pub sky_template: String,
    pub auto_light_matching: bool,
    pub relighting_factor: f32,
    pub recoloring_factor: f32,
    pub halo_effect: bool,
}

impl Default for ProcessingParams {
    fn default() -> Self {
        Self {
            sky_template: SkyTemplate::default_template().id.to_string(),
            auto_light_matching: true,
            relighting_factor: 0.0,
            recoloring_factor: 0.1,
            halo_effect: true,
        }
    }
}

impl ProcessingParams {
    /// Same adjustments with a different sky.
    pub fn with_template(mut self, template: &SkyTemplate) -> Self {
        self.sky_template = template.id.to_string();
        self
    }

    /// Resolve the selected template.
    pub fn template(&self) -> ModelResult<&'static SkyTemplate> {
        SkyTemplate::find(&self.sky_template)
    }
}
