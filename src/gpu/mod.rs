//! GPU plumbing: device setup, surface negotiation and the render passes.
//!
//! [`GpuContext`] owns the wgpu instance, adapter, device and queue and is
//! shared behind an `Arc` by the flowmap and the compositor. It also tracks
//! device loss so the stages can refuse to submit into a dead device.

mod composite_gpu;
mod flowmap_gpu;
pub mod readback;
mod surface;
mod texture_gpu;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use winit::window::Window;

use crate::error::GpuError;
use crate::flowmap::Precision;
use crate::textures::FilterMode;

pub use composite_gpu::CompositingStage;
pub use flowmap_gpu::FlowmapState;
pub use readback::FlowPixels;
pub use surface::{RenderSurface, SurfaceId, SurfacePair};
pub use texture_gpu::GpuTexture;

/// What the device can do with a texture format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatSupport {
    /// Usable as a render attachment and as a sampled texture.
    pub renderable: bool,
    /// Supports linear min/mag filtering.
    pub filterable: bool,
}

/// Result of negotiating the flowmap surface format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceSetup {
    pub precision: Precision,
    pub format: wgpu::TextureFormat,
    pub filter: FilterMode,
}

/// Pick the first renderable format in the requested precision's fallback
/// chain, and linear filtering when that format supports it.
///
/// `Rgba8Unorm` ends every chain and is renderable on every adapter, so the
/// negotiation always produces a setup. Falling back is logged, not an error.
pub fn negotiate_surface(
    requested: Precision,
    probe: impl Fn(wgpu::TextureFormat) -> FormatSupport,
) -> SurfaceSetup {
    let chosen = requested
        .fallback_chain()
        .iter()
        .map(|&precision| (precision, probe(precision.format())))
        .find(|(_, support)| support.renderable);

    let (precision, support) = match chosen {
        Some(found) => found,
        None => {
            log::warn!("no renderable flowmap format reported, forcing Rgba8Unorm");
            (Precision::Byte, probe(Precision::Byte.format()))
        }
    };

    if precision != requested {
        log::warn!(
            "{:?} flowmap surfaces not renderable, falling back to {:?}",
            requested,
            precision
        );
    }

    let filter = if support.filterable {
        FilterMode::Linear
    } else {
        log::warn!(
            "{:?} is not filterable on this adapter, using nearest filtering",
            precision.format()
        );
        FilterMode::Nearest
    };

    SurfaceSetup {
        precision,
        format: precision.format(),
        filter,
    }
}

/// Shared GPU state.
pub struct GpuContext {
    pub instance: wgpu::Instance,
    pub adapter: wgpu::Adapter,
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    lost: Arc<AtomicBool>,
}

impl GpuContext {
    /// Context without a window, for tests and offline tools.
    pub async fn headless() -> Result<Self, GpuError> {
        let instance = create_instance();
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or(GpuError::NoAdapter)?;

        Self::from_adapter(instance, adapter).await
    }

    /// Context plus a presentable surface for `window`.
    pub async fn for_window(
        window: Arc<Window>,
    ) -> Result<(Self, wgpu::Surface<'static>), GpuError> {
        let instance = create_instance();
        let surface = instance.create_surface(window)?;

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .ok_or(GpuError::NoAdapter)?;

        let ctx = Self::from_adapter(instance, adapter).await?;
        Ok((ctx, surface))
    }

    async fn from_adapter(
        instance: wgpu::Instance,
        adapter: wgpu::Adapter,
    ) -> Result<Self, GpuError> {
        let info = adapter.get_info();
        log::info!("using adapter '{}' ({:?})", info.name, info.backend);

        // Lets Rgba32Float surfaces filter linearly where the hardware can.
        let required_features = adapter.features() & wgpu::Features::FLOAT32_FILTERABLE;

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Inkflow Device"),
                    required_features,
                    required_limits: wgpu::Limits::downlevel_defaults()
                        .using_resolution(adapter.limits()),
                    memory_hints: Default::default(),
                },
                None,
            )
            .await?;

        let lost = Arc::new(AtomicBool::new(false));
        let flag = lost.clone();
        device.set_device_lost_callback(move |reason, message| {
            log::error!("GPU device lost ({:?}): {}", reason, message);
            flag.store(true, Ordering::SeqCst);
        });
        device.on_uncaptured_error(Box::new(|e: wgpu::Error| {
            log::error!("uncaptured wgpu error: {}", e);
        }));

        Ok(Self {
            instance,
            adapter,
            device,
            queue,
            lost,
        })
    }

    /// Capabilities of `format` as reported by the adapter.
    pub fn format_support(&self, format: wgpu::TextureFormat) -> FormatSupport {
        format_support_from(
            format,
            self.adapter.get_texture_format_features(format),
            self.device.features(),
        )
    }

    /// Negotiate a flowmap surface setup against this device.
    pub fn negotiate(&self, requested: Precision) -> SurfaceSetup {
        negotiate_surface(requested, |format| self.format_support(format))
    }

    /// Whether the device has been lost. Once set it never clears.
    pub fn is_lost(&self) -> bool {
        self.lost.load(Ordering::SeqCst)
    }

    /// Flag the device as lost, as the device-lost callback does.
    pub fn mark_lost(&self) {
        self.lost.store(true, Ordering::SeqCst);
    }
}

/// Reduce adapter format features to what the flowmap needs.
///
/// 32-bit float formats only filter on a device created with
/// `FLOAT32_FILTERABLE`, whatever the adapter reports.
fn format_support_from(
    format: wgpu::TextureFormat,
    features: wgpu::TextureFormatFeatures,
    device_features: wgpu::Features,
) -> FormatSupport {
    let float32 = matches!(
        format,
        wgpu::TextureFormat::R32Float
            | wgpu::TextureFormat::Rg32Float
            | wgpu::TextureFormat::Rgba32Float
    );
    FormatSupport {
        renderable: features.allowed_usages.contains(
            wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
        ),
        filterable: features
            .flags
            .contains(wgpu::TextureFormatFeatureFlags::FILTERABLE)
            && (!float32 || device_features.contains(wgpu::Features::FLOAT32_FILTERABLE)),
    }
}

fn create_instance() -> wgpu::Instance {
    wgpu::Instance::new(&wgpu::InstanceDescriptor {
        backends: wgpu::Backends::PRIMARY,
        ..Default::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use wgpu::TextureFormat;

    fn probe_with(
        renderable: &'static [TextureFormat],
        filterable: &'static [TextureFormat],
    ) -> impl Fn(TextureFormat) -> FormatSupport {
        move |format| FormatSupport {
            renderable: renderable.contains(&format),
            filterable: filterable.contains(&format),
        }
    }

    const ALL: &[TextureFormat] = &[
        TextureFormat::Rgba16Float,
        TextureFormat::Rgba32Float,
        TextureFormat::Rgba8Unorm,
    ];

    #[test]
    fn test_half_preferred() {
        let setup = negotiate_surface(Precision::Half, probe_with(ALL, ALL));
        assert_eq!(setup.precision, Precision::Half);
        assert_eq!(setup.format, TextureFormat::Rgba16Float);
        assert_eq!(setup.filter, FilterMode::Linear);
    }

    #[test]
    fn test_half_falls_back_to_byte() {
        let setup = negotiate_surface(
            Precision::Half,
            probe_with(&[TextureFormat::Rgba8Unorm, TextureFormat::Rgba32Float], ALL),
        );
        // Half never falls "up" to Full
        assert_eq!(setup.precision, Precision::Byte);
        assert_eq!(setup.format, TextureFormat::Rgba8Unorm);
    }

    #[test]
    fn test_full_falls_back_through_half() {
        let setup = negotiate_surface(
            Precision::Full,
            probe_with(&[TextureFormat::Rgba16Float, TextureFormat::Rgba8Unorm], ALL),
        );
        assert_eq!(setup.precision, Precision::Half);
    }

    #[test]
    fn test_unfilterable_uses_nearest() {
        let setup = negotiate_surface(
            Precision::Full,
            probe_with(ALL, &[TextureFormat::Rgba16Float, TextureFormat::Rgba8Unorm]),
        );
        assert_eq!(setup.precision, Precision::Full);
        assert_eq!(setup.filter, FilterMode::Nearest);
    }

    fn adapter_reports(
        usages: wgpu::TextureUsages,
        flags: wgpu::TextureFormatFeatureFlags,
    ) -> wgpu::TextureFormatFeatures {
        wgpu::TextureFormatFeatures {
            allowed_usages: usages,
            flags,
        }
    }

    #[test]
    fn test_sample_only_format_is_not_renderable() {
        let support = format_support_from(
            TextureFormat::Rgba16Float,
            adapter_reports(
                wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                wgpu::TextureFormatFeatureFlags::FILTERABLE,
            ),
            wgpu::Features::empty(),
        );
        assert!(!support.renderable);

        // A downlevel adapter like this negotiates down to bytes
        let setup = negotiate_surface(Precision::Half, |format| {
            if format == TextureFormat::Rgba8Unorm {
                FormatSupport {
                    renderable: true,
                    filterable: true,
                }
            } else {
                support
            }
        });
        assert_eq!(setup.precision, Precision::Byte);
        assert_eq!(setup.filter, FilterMode::Linear);
    }

    #[test]
    fn test_float32_filtering_needs_device_feature() {
        let reported = || {
            adapter_reports(
                wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
                wgpu::TextureFormatFeatureFlags::FILTERABLE,
            )
        };

        let without = format_support_from(TextureFormat::Rgba32Float, reported(), wgpu::Features::empty());
        assert!(without.renderable);
        assert!(!without.filterable);

        let with = format_support_from(
            TextureFormat::Rgba32Float,
            reported(),
            wgpu::Features::FLOAT32_FILTERABLE,
        );
        assert!(with.filterable);

        let half = format_support_from(TextureFormat::Rgba16Float, reported(), wgpu::Features::empty());
        assert!(half.filterable);
    }

    #[test]
    fn test_unfilterable_report_is_respected() {
        let support = format_support_from(
            TextureFormat::Rgba16Float,
            adapter_reports(
                wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
                wgpu::TextureFormatFeatureFlags::empty(),
            ),
            wgpu::Features::all(),
        );
        assert!(support.renderable);
        assert!(!support.filterable);
    }

    #[test]
    fn test_nothing_renderable_still_yields_byte() {
        let setup = negotiate_surface(Precision::Half, probe_with(&[], &[]));
        assert_eq!(setup.precision, Precision::Byte);
        assert_eq!(setup.filter, FilterMode::Nearest);
    }
}
