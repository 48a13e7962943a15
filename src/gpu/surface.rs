//! Offscreen render surfaces and the read/write pair the flowmap ping-pongs
//! between.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::textures::FilterMode;

static NEXT_SURFACE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a [`RenderSurface`], used to key cached bind
/// groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SurfaceId(u64);

impl SurfaceId {
    fn next() -> Self {
        SurfaceId(NEXT_SURFACE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// A square colour texture that can be rendered into and sampled.
pub struct RenderSurface {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    format: wgpu::TextureFormat,
    filter: FilterMode,
    size: u32,
    id: SurfaceId,
}

impl RenderSurface {
    pub fn new(
        device: &wgpu::Device,
        label: &str,
        size: u32,
        format: wgpu::TextureFormat,
        filter: FilterMode,
    ) -> Self {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width: size,
                height: size,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        Self {
            texture,
            view,
            format,
            filter,
            size,
            id: SurfaceId::next(),
        }
    }

    pub fn texture(&self) -> &wgpu::Texture {
        &self.texture
    }

    pub fn view(&self) -> &wgpu::TextureView {
        &self.view
    }

    pub fn format(&self) -> wgpu::TextureFormat {
        self.format
    }

    /// Filter mode samplers reading this surface must use.
    pub fn filter(&self) -> FilterMode {
        self.filter
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn id(&self) -> SurfaceId {
        self.id
    }

    /// Release the GPU memory now instead of on drop.
    pub fn destroy(&self) {
        self.texture.destroy();
    }
}

/// Two owned values of which exactly one is "read" and the other "write".
///
/// After a pass renders into [`Self::write`], [`Self::swap`] makes that
/// value the new [`Self::read`].
#[derive(Debug)]
pub struct SurfacePair<T> {
    a: T,
    b: T,
    /// Which value is currently read (false = A, true = B)
    read_is_b: bool,
}

impl<T> SurfacePair<T> {
    pub fn new(a: T, b: T) -> Self {
        Self {
            a,
            b,
            read_is_b: false,
        }
    }

    pub fn read(&self) -> &T {
        if self.read_is_b {
            &self.b
        } else {
            &self.a
        }
    }

    pub fn write(&self) -> &T {
        if self.read_is_b {
            &self.a
        } else {
            &self.b
        }
    }

    /// 0 when A is read, 1 when B is read.
    pub fn read_index(&self) -> usize {
        self.read_is_b as usize
    }

    pub fn swap(&mut self) {
        self.read_is_b = !self.read_is_b;
    }

    pub fn both(&self) -> [&T; 2] {
        [&self.a, &self.b]
    }

    pub fn into_inner(self) -> (T, T) {
        (self.a, self.b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_and_write_differ() {
        let mut pair = SurfacePair::new(1, 2);
        for _ in 0..5 {
            assert_ne!(pair.read(), pair.write());
            pair.swap();
        }
    }

    #[test]
    fn test_swap_makes_written_readable() {
        let mut pair = SurfacePair::new("a", "b");
        assert_eq!(*pair.read(), "a");
        let written = *pair.write();
        pair.swap();
        assert_eq!(*pair.read(), written);
        assert_eq!(pair.read_index(), 1);
    }

    #[test]
    fn test_double_swap_is_identity() {
        let mut pair = SurfacePair::new(10, 20);
        pair.swap();
        pair.swap();
        assert_eq!(*pair.read(), 10);
        assert_eq!(*pair.write(), 20);
        assert_eq!(pair.into_inner(), (10, 20));
    }

    #[test]
    fn test_surface_ids_are_unique() {
        let a = SurfaceId::next();
        let b = SurfaceId::next();
        assert_ne!(a, b);
    }
}
