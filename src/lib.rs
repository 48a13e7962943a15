//! # inkflow
//!
//! A pointer-driven GPU flowmap that smears and ink-grades an image.
//!
//! The flowmap is a small pair of float textures. Every frame the previous
//! contents decay and a noisy blot is stamped where the pointer moved, so a
//! drag leaves an organic trail that slowly fades. A compositing pass then
//! uses that trail to displace the image and tint it toward a grayscale,
//! paper-textured print.
//!
//! ## Quick Start
//!
//! ```ignore
//! use inkflow::prelude::*;
//!
//! fn main() -> Result<(), AppError> {
//!     let image = TextureConfig::from_file("photo.jpg")?;
//!     FlowmapApp::new(image)
//!         .with_flowmap(FlowmapConfig::for_image().with_falloff(0.3))
//!         .run()
//! }
//! ```
//!
//! ## Headless use
//!
//! The flowmap does not need a window. Tests and tools drive it directly:
//!
//! ```ignore
//! let ctx = Arc::new(pollster::block_on(GpuContext::headless())?);
//! let mut flowmap = FlowmapState::new(ctx, FlowmapConfig::default());
//!
//! flowmap.set_input(PointerState::new(Vec2::new(0.5, 0.5), Vec2::ZERO));
//! flowmap.advance()?;
//!
//! let pixels = flowmap.read_pixels()?;
//! assert!(pixels.at_uv(0.5, 0.5)[0] > 0.9);
//! ```
//!
//! ## Channels
//!
//! | Channel | Stamp threshold | Noise seed | Used for |
//! |---------|-----------------|------------|----------|
//! | red     | 0.1             | z = 1.0    | UV displacement and gray ink |
//! | green   | -               | -          | decays only |
//! | blue    | 0.125           | z = 0.0    | paper blend mask |
//!
//! ## Precision
//!
//! Surfaces are half float when the adapter can render to it, falling back
//! to 8-bit. Full float can be requested with
//! [`FlowmapConfig::with_precision`] and falls back through half float.
//! Filtering drops to nearest when the chosen format is not filterable.
//! Support is read from the adapter, so downlevel adapters without float
//! render targets end up on 8-bit surfaces.
//!
//! ## Testing
//!
//! The integration tests in `tests/` need a GPU adapter. Without one they
//! print a note and return early, which cargo reports as a pass. Set
//! `INKFLOW_REQUIRE_GPU=1` to make a missing adapter fail them instead.

pub mod app;
pub mod composite;
pub mod error;
pub mod flowmap;
pub mod gpu;
pub mod input;
pub mod shader_utils;
pub mod textures;
pub mod time;

pub use app::{FlowmapApp, Settings};
pub use composite::CompositeConfig;
pub use error::{AppError, ConfigError, FlowmapError, GpuError, TextureError};
pub use flowmap::{FlowmapConfig, PointerState, Precision};
pub use glam::Vec2;
pub use gpu::{
    negotiate_surface, CompositingStage, FlowPixels, FlowmapState, FormatSupport, GpuContext,
    GpuTexture, RenderSurface, SurfaceId, SurfacePair, SurfaceSetup,
};
pub use input::{PointerPhase, PointerSample, PointerTracker, VelocityEasing};
pub use textures::{AddressMode, FilterMode, TextureConfig};
pub use time::FrameClock;

/// Everything needed to run or drive the effect.
pub mod prelude {
    pub use crate::app::{FlowmapApp, Settings};
    pub use crate::composite::CompositeConfig;
    pub use crate::error::{AppError, ConfigError, FlowmapError, GpuError, TextureError};
    pub use crate::flowmap::{FlowmapConfig, PointerState, Precision};
    pub use crate::gpu::{CompositingStage, FlowmapState, GpuContext};
    pub use crate::input::{PointerPhase, PointerTracker, VelocityEasing};
    pub use crate::textures::{AddressMode, FilterMode, TextureConfig};
    pub use crate::Vec2;
}
