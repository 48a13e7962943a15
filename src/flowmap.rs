//! Flowmap configuration and pointer state.
//!
//! A flowmap is a small square texture that accumulates pointer "paint".
//! Each frame the previous contents are multiplied by `dissipation`, and a
//! noisy blot is stamped around the pointer: red inside a tight threshold,
//! blue inside a slightly wider one. The GPU side lives in
//! [`crate::FlowmapState`]; this module only holds the plain data.
//!
//! # Example
//!
//! ```ignore
//! let config = FlowmapConfig::for_image()
//!     .with_falloff(0.3)
//!     .with_dissipation(0.95);
//! let mut flowmap = FlowmapState::new(ctx.clone(), config);
//! flowmap.set_input(PointerState::new(Vec2::new(0.5, 0.5), Vec2::ZERO));
//! flowmap.advance()?;
//! ```

use glam::Vec2;
use serde::{Deserialize, Serialize};

use crate::error::{check_range, ConfigError};

/// Numeric precision of the flowmap render surfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Precision {
    /// 16-bit float per channel (`Rgba16Float`). Preferred.
    #[default]
    Half,
    /// 32-bit float per channel (`Rgba32Float`). Only linearly filterable
    /// when the adapter exposes `FLOAT32_FILTERABLE`.
    Full,
    /// 8-bit normalized per channel (`Rgba8Unorm`). Last resort; decay
    /// quantizes to 1/255 steps.
    Byte,
}

impl Precision {
    /// Texture format backing this precision.
    pub fn format(self) -> wgpu::TextureFormat {
        match self {
            Precision::Half => wgpu::TextureFormat::Rgba16Float,
            Precision::Full => wgpu::TextureFormat::Rgba32Float,
            Precision::Byte => wgpu::TextureFormat::Rgba8Unorm,
        }
    }

    /// Order in which formats are tried when this precision is requested.
    pub fn fallback_chain(self) -> &'static [Precision] {
        match self {
            Precision::Half => &[Precision::Half, Precision::Byte],
            Precision::Full => &[Precision::Full, Precision::Half, Precision::Byte],
            Precision::Byte => &[Precision::Byte],
        }
    }
}

fn default_size() -> u32 {
    FlowmapConfig::DEFAULT_SIZE
}

fn default_falloff() -> f32 {
    0.3
}

fn default_alpha() -> f32 {
    1.0
}

fn default_dissipation() -> f32 {
    0.95
}

fn default_noise_strength() -> f32 {
    0.2
}

fn default_noise_scale() -> f32 {
    15.0
}

fn default_aspect_correction() -> bool {
    true
}

/// Configuration for a flowmap.
///
/// Everything here is fixed once the [`crate::FlowmapState`] is built,
/// except the viewport aspect which is pushed every frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowmapConfig {
    /// Width and height of both render surfaces, in texels.
    #[serde(default = "default_size")]
    pub size: u32,

    /// Stamp radius as a fraction of the surface. The shader uses half of
    /// this as the outer edge of the falloff ramp.
    #[serde(default = "default_falloff")]
    pub falloff: f32,

    /// Stamp opacity (0.0-1.0).
    #[serde(default = "default_alpha")]
    pub alpha: f32,

    /// Per-step decay multiplier in (0, 1). Closer to 1 fades slower.
    #[serde(default = "default_dissipation")]
    pub dissipation: f32,

    /// Forced surface precision. `None` picks [`Precision::Half`] and falls
    /// back from there.
    #[serde(default)]
    pub precision: Option<Precision>,

    /// How strongly fractal noise perturbs the stamp edge. 0.0 gives a
    /// clean disc; at most [`FlowmapConfig::MAX_NOISE_STRENGTH`].
    #[serde(default = "default_noise_strength")]
    pub noise_strength: f32,

    /// Spatial frequency of the edge noise in UV space.
    #[serde(default = "default_noise_scale")]
    pub noise_scale: f32,

    /// Scale the horizontal pointer offset by the viewport aspect so the
    /// stamp stays round on non-square viewports.
    #[serde(default = "default_aspect_correction")]
    pub aspect_correction: bool,
}

impl Default for FlowmapConfig {
    fn default() -> Self {
        Self::new(Self::DEFAULT_SIZE)
    }
}

impl FlowmapConfig {
    /// Surface size for generic use.
    pub const DEFAULT_SIZE: u32 = 128;
    /// Surface size used by the image effect.
    pub const IMAGE_SIZE: u32 = 512;
    /// Largest supported surface size.
    pub const MAX_SIZE: u32 = 4096;
    /// Upper bound on `noise_strength`.
    ///
    /// The stamp test scales the distance by `1 + fbm * strength`, and `fbm`
    /// can reach `-FBM_AMPLITUDE`. Past this bound that factor nears zero and
    /// texels far from the pointer (or any texel, with the pointer at the
    /// inactive sentinel) pass the threshold.
    pub const MAX_NOISE_STRENGTH: f32 = 0.75;

    /// Create a configuration with the given surface size.
    ///
    /// Default values:
    /// - `falloff`: 0.3
    /// - `alpha`: 1.0
    /// - `dissipation`: 0.95
    /// - `precision`: negotiated (half float preferred)
    /// - `noise_strength`: 0.2
    /// - `noise_scale`: 15.0
    pub fn new(size: u32) -> Self {
        assert!(size >= 1, "Flowmap size must be at least 1");
        assert!(size <= Self::MAX_SIZE, "Flowmap size must be at most 4096");
        Self {
            size,
            falloff: default_falloff(),
            alpha: default_alpha(),
            dissipation: default_dissipation(),
            precision: None,
            noise_strength: default_noise_strength(),
            noise_scale: default_noise_scale(),
            aspect_correction: default_aspect_correction(),
        }
    }

    /// Configuration used behind an image: 512x512 surfaces.
    pub fn for_image() -> Self {
        Self::new(Self::IMAGE_SIZE)
    }

    /// Set the stamp falloff radius.
    pub fn with_falloff(mut self, falloff: f32) -> Self {
        self.falloff = falloff.max(0.0);
        self
    }

    /// Set the stamp opacity (clamped to 0.0-1.0).
    pub fn with_alpha(mut self, alpha: f32) -> Self {
        self.alpha = alpha.clamp(0.0, 1.0);
        self
    }

    /// Set the per-step decay multiplier (clamped to 0.0-1.0).
    ///
    /// - 0.99 = slow fade
    /// - 0.95 = default
    /// - 0.8 = fast fade
    pub fn with_dissipation(mut self, dissipation: f32) -> Self {
        self.dissipation = dissipation.clamp(0.0, 1.0);
        self
    }

    /// Force a surface precision instead of negotiating from half float.
    pub fn with_precision(mut self, precision: Precision) -> Self {
        self.precision = Some(precision);
        self
    }

    /// Set the edge-noise strength (clamped to 0.0-[`Self::MAX_NOISE_STRENGTH`]).
    /// 0.0 disables the perturbation.
    pub fn with_noise_strength(mut self, strength: f32) -> Self {
        self.noise_strength = strength.clamp(0.0, Self::MAX_NOISE_STRENGTH);
        self
    }

    /// Set the edge-noise frequency.
    pub fn with_noise_scale(mut self, scale: f32) -> Self {
        self.noise_scale = scale;
        self
    }

    /// Enable or disable aspect correction of the stamp.
    pub fn with_aspect_correction(mut self, enabled: bool) -> Self {
        self.aspect_correction = enabled;
        self
    }

    /// Outer edge of the falloff ramp as seen by the shader.
    pub fn shader_falloff(&self) -> f32 {
        self.falloff * 0.5
    }

    /// Requested precision, or the preferred default.
    pub fn requested_precision(&self) -> Precision {
        self.precision.unwrap_or_default()
    }

    /// Reject values the builder methods would have clamped or refused.
    ///
    /// Deserialized configs skip the builders, so settings files go through
    /// this before use.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_range("flowmap.size", self.size as f64, 1.0, Self::MAX_SIZE as f64)?;
        check_range("flowmap.falloff", self.falloff as f64, 0.0, f32::MAX as f64)?;
        check_range("flowmap.alpha", self.alpha as f64, 0.0, 1.0)?;
        check_range("flowmap.dissipation", self.dissipation as f64, 0.0, 1.0)?;
        check_range(
            "flowmap.noise_strength",
            self.noise_strength as f64,
            0.0,
            Self::MAX_NOISE_STRENGTH as f64,
        )?;
        check_range(
            "flowmap.noise_scale",
            self.noise_scale as f64,
            f32::MIN as f64,
            f32::MAX as f64,
        )?;
        Ok(())
    }

    /// Copy with every field forced into its supported range.
    pub fn clamped(&self) -> Self {
        let finite_or = |v: f32, fallback: f32| if v.is_finite() { v } else { fallback };
        Self {
            size: self.size.clamp(1, Self::MAX_SIZE),
            falloff: finite_or(self.falloff, default_falloff()).max(0.0),
            alpha: finite_or(self.alpha, default_alpha()).clamp(0.0, 1.0),
            dissipation: finite_or(self.dissipation, default_dissipation()).clamp(0.0, 1.0),
            precision: self.precision,
            noise_strength: finite_or(self.noise_strength, default_noise_strength())
                .clamp(0.0, Self::MAX_NOISE_STRENGTH),
            noise_scale: finite_or(self.noise_scale, default_noise_scale()),
            aspect_correction: self.aspect_correction,
        }
    }
}

/// Latest pointer sample fed to the flowmap.
///
/// `position` is normalized to [0,1]² with y pointing up, or
/// [`PointerState::INACTIVE`] when nothing should be stamped. `velocity` is
/// in screen pixels per millisecond.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointerState {
    pub position: Vec2,
    pub velocity: Vec2,
}

impl Default for PointerState {
    fn default() -> Self {
        Self::inactive()
    }
}

impl PointerState {
    /// Off-canvas sentinel position. Far enough from every texel that the
    /// stamp threshold can never be met.
    pub const INACTIVE: Vec2 = Vec2::new(-1.0, -1.0);

    pub fn new(position: Vec2, velocity: Vec2) -> Self {
        Self { position, velocity }
    }

    /// No stamping, zero velocity.
    pub fn inactive() -> Self {
        Self {
            position: Self::INACTIVE,
            velocity: Vec2::ZERO,
        }
    }

    pub fn is_active(&self) -> bool {
        self.position != Self::INACTIVE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = FlowmapConfig::default();
        assert_eq!(config.size, 128);
        assert_eq!(config.falloff, 0.3);
        assert_eq!(config.alpha, 1.0);
        assert_eq!(config.dissipation, 0.95);
        assert_eq!(config.precision, None);
        assert!(config.aspect_correction);
        assert_eq!(FlowmapConfig::for_image().size, 512);
    }

    #[test]
    fn test_shader_falloff_is_halved() {
        let config = FlowmapConfig::default().with_falloff(0.3);
        assert!((config.shader_falloff() - 0.15).abs() < 1e-6);
    }

    #[test]
    fn test_builder_clamps() {
        let config = FlowmapConfig::new(64)
            .with_alpha(2.0)
            .with_dissipation(1.5)
            .with_noise_strength(-1.0);
        assert_eq!(config.alpha, 1.0);
        assert_eq!(config.dissipation, 1.0);
        assert_eq!(config.noise_strength, 0.0);

        let noisy = FlowmapConfig::new(64).with_noise_strength(3.0);
        assert_eq!(noisy.noise_strength, FlowmapConfig::MAX_NOISE_STRENGTH);
    }

    #[test]
    fn test_max_noise_strength_keeps_sentinel_outside_threshold() {
        // The nearest texel to (-1, -1) is at least 1.0 away vertically, and
        // speed shortens the distance by at most 0.1.
        let min_sentinel_dist = 1.0 - 0.1;
        let worst_scale = 1.0 - crate::shader_utils::FBM_AMPLITUDE * FlowmapConfig::MAX_NOISE_STRENGTH;
        assert!(worst_scale > 0.0);
        // Blue has the wider threshold
        assert!(min_sentinel_dist * worst_scale > 0.125);
    }

    #[test]
    fn test_validate_accepts_builder_output() {
        let config = FlowmapConfig::new(64)
            .with_alpha(7.0)
            .with_dissipation(1.5)
            .with_noise_strength(3.0);
        assert!(config.validate().is_ok());
        assert!(FlowmapConfig::default().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_out_of_range_fields() {
        let mut config = FlowmapConfig::default();
        config.dissipation = 1.5;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::OutOfRange { field: "flowmap.dissipation", .. })
        ));

        let mut config = FlowmapConfig::default();
        config.size = 0;
        assert!(config.validate().is_err());

        let mut config = FlowmapConfig::default();
        config.noise_strength = 3.0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::OutOfRange { field: "flowmap.noise_strength", .. })
        ));

        let mut config = FlowmapConfig::default();
        config.alpha = f32::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_clamped_repairs_struct_literal_values() {
        let config = FlowmapConfig {
            size: 0,
            dissipation: 1.5,
            alpha: 7.0,
            noise_strength: 3.0,
            noise_scale: f32::INFINITY,
            ..FlowmapConfig::default()
        }
        .clamped();
        assert_eq!(config.size, 1);
        assert_eq!(config.dissipation, 1.0);
        assert_eq!(config.alpha, 1.0);
        assert_eq!(config.noise_strength, FlowmapConfig::MAX_NOISE_STRENGTH);
        assert_eq!(config.noise_scale, 15.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    #[should_panic(expected = "at least 1")]
    fn test_zero_size_rejected() {
        let _ = FlowmapConfig::new(0);
    }

    #[test]
    fn test_requested_precision_defaults_to_half() {
        assert_eq!(FlowmapConfig::default().requested_precision(), Precision::Half);
        assert_eq!(
            FlowmapConfig::default()
                .with_precision(Precision::Full)
                .requested_precision(),
            Precision::Full
        );
    }

    #[test]
    fn test_fallback_chain_ends_in_byte() {
        for p in [Precision::Half, Precision::Full, Precision::Byte] {
            let chain = p.fallback_chain();
            assert_eq!(chain[0], p);
            assert_eq!(*chain.last().unwrap(), Precision::Byte);
        }
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: FlowmapConfig =
            serde_json::from_str(r#"{ "size": 256, "precision": "full" }"#).unwrap();
        assert_eq!(config.size, 256);
        assert_eq!(config.precision, Some(Precision::Full));
        assert_eq!(config.dissipation, 0.95);
        assert_eq!(config.noise_scale, 15.0);
    }

    #[test]
    fn test_pointer_sentinel() {
        let p = PointerState::default();
        assert!(!p.is_active());
        assert_eq!(p.velocity, Vec2::ZERO);
        assert!(PointerState::new(Vec2::new(0.0, 0.0), Vec2::ZERO).is_active());
    }
}
