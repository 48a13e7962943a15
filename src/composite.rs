//! Settings for the final compositing pass.
//!
//! The compositor samples the image through a UV offset taken from the
//! flowmap's red channel, then blends toward a paper-tinted grayscale
//! version of it where the flow is strong. See [`crate::CompositingStage`].

use serde::{Deserialize, Serialize};

use crate::error::{check_range, ConfigError};

fn default_displacement() -> f32 {
    0.01
}

fn default_blend_gain() -> f32 {
    10.0
}

/// Tunables for [`crate::CompositingStage`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CompositeConfig {
    /// UV offset per unit of flow red. Moves the sample right and up.
    #[serde(default = "default_displacement")]
    pub displacement: f32,
    /// Multiplier on the squared flow channel before clamping to 1, so the
    /// blend saturates quickly once flow builds up.
    #[serde(default = "default_blend_gain")]
    pub blend_gain: f32,
}

impl Default for CompositeConfig {
    fn default() -> Self {
        Self {
            displacement: default_displacement(),
            blend_gain: default_blend_gain(),
        }
    }
}

impl CompositeConfig {
    pub fn with_displacement(mut self, displacement: f32) -> Self {
        self.displacement = displacement;
        self
    }

    pub fn with_blend_gain(mut self, gain: f32) -> Self {
        self.blend_gain = gain.max(0.0);
        self
    }

    /// Reject non-finite displacement and negative or non-finite gain.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_range(
            "composite.displacement",
            self.displacement as f64,
            f32::MIN as f64,
            f32::MAX as f64,
        )?;
        check_range("composite.blend_gain", self.blend_gain as f64, 0.0, f32::MAX as f64)
    }

    /// Weight the shader gives a flow channel value `c`.
    pub fn blend_weight(&self, c: f32) -> f32 {
        (c * c * self.blend_gain).min(1.0)
    }
}
