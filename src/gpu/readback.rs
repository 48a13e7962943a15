//! Copying textures back to the CPU.
//!
//! Flowmap surfaces can be half float, full float or 8-bit, so they are
//! first blitted into an `Rgba32Float` texture of the same size and read
//! back from there. Plain `Rgba8Unorm` textures can be read directly.

use crate::error::GpuError;
use crate::gpu::GpuContext;
use crate::shader_utils;

/// Texture-to-buffer copies need rows padded to this many bytes.
const ROW_ALIGNMENT: u32 = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;

const BLIT_WGSL: &str = r#"
@group(0) @binding(0) var source: texture_2d<f32>;

@fragment
fn fs_blit(in: VertexOutput) -> @location(0) vec4<f32> {
    return textureLoad(source, vec2<i32>(in.clip_position.xy), 0);
}
"#;

pub(crate) fn blit_shader() -> String {
    format!("{}\n{}", shader_utils::FULLSCREEN_WGSL, BLIT_WGSL)
}

/// CPU copy of a flowmap surface.
///
/// Rows are stored top row first, which is `uv.y = 1` in flowmap space.
#[derive(Debug, Clone)]
pub struct FlowPixels {
    pub size: u32,
    pub data: Vec<[f32; 4]>,
}

impl FlowPixels {
    /// Texel at integer coordinates, top-left origin.
    pub fn texel(&self, x: u32, y: u32) -> [f32; 4] {
        self.data[(y * self.size + x) as usize]
    }

    /// Texel containing the y-up UV coordinate `(u, v)`, clamped to the
    /// surface.
    pub fn at_uv(&self, u: f32, v: f32) -> [f32; 4] {
        let max = (self.size - 1) as f32;
        let x = (u * self.size as f32).floor().clamp(0.0, max) as u32;
        let y = ((1.0 - v) * self.size as f32).floor().clamp(0.0, max) as u32;
        self.texel(x, y)
    }

    /// Mean of the red, green and blue channels over every texel.
    pub fn mean_rgb(&self) -> [f32; 3] {
        let mut sum = [0.0f64; 3];
        for px in &self.data {
            for c in 0..3 {
                sum[c] += px[c] as f64;
            }
        }
        let n = self.data.len().max(1) as f64;
        [
            (sum[0] / n) as f32,
            (sum[1] / n) as f32,
            (sum[2] / n) as f32,
        ]
    }
}

/// Blit pipeline and float staging target, built on first readback.
pub(crate) struct FloatReadback {
    pipeline: wgpu::RenderPipeline,
    layout: wgpu::BindGroupLayout,
    target: wgpu::Texture,
    target_view: wgpu::TextureView,
    size: u32,
}

impl FloatReadback {
    pub(crate) fn new(device: &wgpu::Device, size: u32) -> Self {
        let target = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Flowmap Readback Target"),
            size: wgpu::Extent3d {
                width: size,
                height: size,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba32Float,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let target_view = target.create_view(&wgpu::TextureViewDescriptor::default());

        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Readback Blit Bind Group Layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Texture {
                    sample_type: wgpu::TextureSampleType::Float { filterable: false },
                    view_dimension: wgpu::TextureViewDimension::D2,
                    multisampled: false,
                },
                count: None,
            }],
        });

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Readback Blit Shader"),
            source: wgpu::ShaderSource::Wgsl(blit_shader().into()),
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Readback Blit Pipeline Layout"),
            bind_group_layouts: &[&layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Readback Blit Pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_fullscreen"),
                buffers: &[],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_blit"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: wgpu::TextureFormat::Rgba32Float,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState::default(),
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });

        Self {
            pipeline,
            layout,
            target,
            target_view,
            size,
        }
    }

    /// Blit `source` into the float target and read it back.
    pub(crate) fn read(
        &self,
        ctx: &GpuContext,
        source: &wgpu::TextureView,
    ) -> Result<FlowPixels, GpuError> {
        let bind_group = ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Readback Blit Bind Group"),
            layout: &self.layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::TextureView(source),
            }],
        });

        let mut encoder = ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Readback Blit Encoder"),
            });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Readback Blit Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &self.target_view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.draw(0..3, 0..1);
        }
        ctx.queue.submit(std::iter::once(encoder.finish()));

        let bytes = read_texture_bytes(ctx, &self.target, self.size, self.size, 16)?;
        let data = bytes
            .chunks_exact(16)
            .map(|texel| {
                let mut px = [0.0f32; 4];
                for (c, channel) in texel.chunks_exact(4).enumerate() {
                    px[c] = f32::from_le_bytes([channel[0], channel[1], channel[2], channel[3]]);
                }
                px
            })
            .collect();

        Ok(FlowPixels {
            size: self.size,
            data,
        })
    }
}

/// Read an `Rgba8Unorm` texture with `COPY_SRC` usage, top row first.
pub fn read_texture_rgba8(
    ctx: &GpuContext,
    texture: &wgpu::Texture,
) -> Result<Vec<[u8; 4]>, GpuError> {
    let bytes = read_texture_bytes(ctx, texture, texture.width(), texture.height(), 4)?;
    Ok(bytes
        .chunks_exact(4)
        .map(|px| [px[0], px[1], px[2], px[3]])
        .collect())
}

/// Copy a whole texture into a staging buffer and return its rows without
/// padding.
fn read_texture_bytes(
    ctx: &GpuContext,
    texture: &wgpu::Texture,
    width: u32,
    height: u32,
    bytes_per_texel: u32,
) -> Result<Vec<u8>, GpuError> {
    let unpadded_row = width * bytes_per_texel;
    let padded_row = unpadded_row.div_ceil(ROW_ALIGNMENT) * ROW_ALIGNMENT;

    let staging = ctx.device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("Readback Staging Buffer"),
        size: (padded_row * height) as wgpu::BufferAddress,
        usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
        mapped_at_creation: false,
    });

    let mut encoder = ctx
        .device
        .create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Readback Copy Encoder"),
        });
    encoder.copy_texture_to_buffer(
        wgpu::TexelCopyTextureInfo {
            texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        wgpu::TexelCopyBufferInfo {
            buffer: &staging,
            layout: wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(padded_row),
                rows_per_image: Some(height),
            },
        },
        wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
    );
    ctx.queue.submit(std::iter::once(encoder.finish()));

    let slice = staging.slice(..);
    let (tx, rx) = std::sync::mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = tx.send(result);
    });
    ctx.device.poll(wgpu::Maintain::Wait);

    match rx.recv() {
        Ok(Ok(())) => {}
        Ok(Err(e)) => return Err(GpuError::BufferMapping(e.to_string())),
        Err(_) => {
            return Err(GpuError::BufferMapping(
                "map callback dropped before completing".into(),
            ))
        }
    }

    let mut out = Vec::with_capacity((unpadded_row * height) as usize);
    {
        let mapped = slice.get_mapped_range();
        for row in mapped.chunks(padded_row as usize) {
            out.extend_from_slice(&row[..unpadded_row as usize]);
        }
    }
    staging.unmap();

    Ok(out)
}
