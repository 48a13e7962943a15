//! Texture sources for the compositor.
//!
//! The compositor samples two RGBA8 textures: the source image and a
//! "paper" texture multiplied into the inked regions. Both are described by
//! a [`TextureConfig`] and uploaded by [`crate::gpu::GpuTexture`].
//!
//! # Supported Formats
//!
//! - PNG
//! - JPEG

use std::path::Path;

use crate::error::TextureError;

/// Filter mode for texture sampling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FilterMode {
    /// Smooth linear filtering (default).
    #[default]
    Linear,
    /// Sharp nearest-neighbor filtering. Used for float surfaces the
    /// adapter cannot filter.
    Nearest,
}

impl FilterMode {
    pub fn to_wgpu(self) -> wgpu::FilterMode {
        match self {
            FilterMode::Linear => wgpu::FilterMode::Linear,
            FilterMode::Nearest => wgpu::FilterMode::Nearest,
        }
    }

    pub fn is_filtering(self) -> bool {
        matches!(self, FilterMode::Linear)
    }
}

/// Address mode for texture wrapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AddressMode {
    /// Clamp to edge color (default). Coordinates outside 0-1 use edge pixels.
    #[default]
    ClampToEdge,
    /// Repeat/tile the texture. Coordinates wrap around.
    Repeat,
    /// Mirror the texture at boundaries.
    MirrorRepeat,
}

impl AddressMode {
    pub fn to_wgpu(self) -> wgpu::AddressMode {
        match self {
            AddressMode::ClampToEdge => wgpu::AddressMode::ClampToEdge,
            AddressMode::Repeat => wgpu::AddressMode::Repeat,
            AddressMode::MirrorRepeat => wgpu::AddressMode::MirrorRepeat,
        }
    }
}

/// Configuration for a single texture.
#[derive(Debug, Clone)]
pub struct TextureConfig {
    /// Raw RGBA pixel data (width * height * 4 bytes), top row first.
    pub data: Vec<u8>,
    /// Texture width in pixels.
    pub width: u32,
    /// Texture height in pixels.
    pub height: u32,
    /// Filter mode for magnification/minification.
    pub filter: FilterMode,
    /// Address mode for UV coordinates outside 0-1.
    pub address_mode: AddressMode,
}

impl TextureConfig {
    /// Create a texture configuration from raw RGBA data.
    ///
    /// # Example
    ///
    /// ```ignore
    /// // 2x2 checkerboard
    /// let data = vec![
    ///     255, 255, 255, 255,
    ///     0, 0, 0, 255,
    ///     0, 0, 0, 255,
    ///     255, 255, 255, 255,
    /// ];
    /// let tex = TextureConfig::from_rgba(data, 2, 2)?;
    /// ```
    pub fn from_rgba(data: Vec<u8>, width: u32, height: u32) -> Result<Self, TextureError> {
        let expected = width as usize * height as usize * 4;
        if data.len() != expected || expected == 0 {
            return Err(TextureError::SizeMismatch {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            data,
            width,
            height,
            filter: FilterMode::Linear,
            address_mode: AddressMode::ClampToEdge,
        })
    }

    /// Load a texture from an image file.
    ///
    /// ```ignore
    /// let photo = TextureConfig::from_file("assets/photo.jpg")?;
    /// ```
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, TextureError> {
        let bytes = std::fs::read(path.as_ref())?;
        let img = image::load_from_memory(&bytes)?.into_rgba8();
        let (width, height) = img.dimensions();
        log::info!(
            "loaded texture '{}' ({}x{})",
            path.as_ref().display(),
            width,
            height
        );
        Ok(Self {
            data: img.into_raw(),
            width,
            height,
            filter: FilterMode::Linear,
            address_mode: AddressMode::ClampToEdge,
        })
    }

    /// Set the filter mode.
    pub fn with_filter(mut self, filter: FilterMode) -> Self {
        self.filter = filter;
        self
    }

    /// Set the address mode for UV wrapping.
    pub fn with_address_mode(mut self, mode: AddressMode) -> Self {
        self.address_mode = mode;
        self
    }

    /// Create a solid color texture (1x1 pixel).
    ///
    /// ```ignore
    /// let white = TextureConfig::solid(255, 255, 255, 255);
    /// ```
    pub fn solid(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self {
            data: vec![r, g, b, a],
            width: 1,
            height: 1,
            filter: FilterMode::Nearest,
            address_mode: AddressMode::ClampToEdge,
        }
    }

    /// Procedural off-white paper grain, used when no paper image is given.
    ///
    /// Warm base tone with per-pixel fiber noise of about ±6%.
    pub fn paper(size: u32, seed: u32) -> Self {
        let size = size.max(1);
        let mut data = Vec::with_capacity((size * size * 4) as usize);
        for y in 0..size {
            for x in 0..size {
                let fine = hash_noise(x, y, seed) as f32 / 255.0;
                let coarse = hash_noise(x / 4, y / 4, seed ^ 0x9e37_79b9) as f32 / 255.0;
                let grain = (fine * 0.4 + coarse * 0.6 - 0.5) * 0.12;
                data.push(shade(0.96 + grain));
                data.push(shade(0.93 + grain));
                data.push(shade(0.87 + grain));
                data.push(255);
            }
        }
        Self {
            data,
            width: size,
            height: size,
            filter: FilterMode::Linear,
            address_mode: AddressMode::Repeat,
        }
    }

    /// Read a pixel, top-left origin.
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let i = ((y * self.width + x) * 4) as usize;
        [self.data[i], self.data[i + 1], self.data[i + 2], self.data[i + 3]]
    }
}

impl TryFrom<&str> for TextureConfig {
    type Error = TextureError;

    fn try_from(path: &str) -> Result<Self, Self::Error> {
        TextureConfig::from_file(path)
    }
}

impl TryFrom<&Path> for TextureConfig {
    type Error = TextureError;

    fn try_from(path: &Path) -> Result<Self, Self::Error> {
        TextureConfig::from_file(path)
    }
}

fn shade(v: f32) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// Simple hash-based noise function.
fn hash_noise(x: u32, y: u32, seed: u32) -> u8 {
    let mut n = x
        .wrapping_mul(374761393)
        .wrapping_add(y.wrapping_mul(668265263))
        .wrapping_add(seed.wrapping_mul(1013904223));
    n = (n ^ (n >> 13)).wrapping_mul(1274126177);
    n = n ^ (n >> 16);
    (n & 255) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_rgba_checks_size() {
        assert!(TextureConfig::from_rgba(vec![0; 16], 2, 2).is_ok());
        let err = TextureConfig::from_rgba(vec![0; 12], 2, 2).unwrap_err();
        assert!(matches!(
            err,
            TextureError::SizeMismatch {
                expected: 16,
                actual: 12
            }
        ));
        assert!(TextureConfig::from_rgba(Vec::new(), 0, 0).is_err());
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = TextureConfig::from_file("definitely/not/here.png").unwrap_err();
        assert!(matches!(err, TextureError::Io(_)));
    }

    #[test]
    fn test_paper_is_deterministic_and_light() {
        let a = TextureConfig::paper(32, 3);
        let b = TextureConfig::paper(32, 3);
        assert_eq!(a.data, b.data);
        assert_eq!(a.address_mode, AddressMode::Repeat);

        let mean = a.data.chunks(4).map(|p| p[0] as f32).sum::<f32>() / (32.0 * 32.0);
        assert!(mean > 220.0, "paper should be light, mean red {mean}");
        assert!(a.data.chunks(4).all(|p| p[3] == 255));
    }

    #[test]
    fn test_paper_seed_changes_grain() {
        assert_ne!(TextureConfig::paper(16, 1).data, TextureConfig::paper(16, 2).data);
    }

    #[test]
    fn test_solid_pixel() {
        let tex = TextureConfig::solid(10, 20, 30, 40);
        assert_eq!(tex.pixel(0, 0), [10, 20, 30, 40]);
        assert_eq!(tex.filter, FilterMode::Nearest);
    }

    #[test]
    fn test_filter_mode_mapping() {
        assert_eq!(FilterMode::Linear.to_wgpu(), wgpu::FilterMode::Linear);
        assert_eq!(FilterMode::Nearest.to_wgpu(), wgpu::FilterMode::Nearest);
        assert!(!FilterMode::Nearest.is_filtering());
    }
}
