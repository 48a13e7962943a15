//! Final pass: image displacement and paper/grayscale grading driven by the
//! flowmap.

use std::collections::HashMap;
use std::sync::Arc;

use bytemuck::{Pod, Zeroable};

use super::surface::{RenderSurface, SurfaceId};
use super::texture_gpu::GpuTexture;
use super::GpuContext;
use crate::composite::CompositeConfig;
use crate::error::FlowmapError;
use crate::shader_utils;
use crate::textures::{FilterMode, TextureConfig};

/// The flowmap only ever alternates between two surfaces. Anything beyond a
/// few cached bind groups belongs to a flowmap that no longer exists.
const MAX_CACHED_BIND_GROUPS: usize = 4;

#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
struct CompositeUniforms {
    displacement: f32,
    blend_gain: f32,
    time: f32,
    _padding: f32,
}

const COMPOSITE_WGSL: &str = r#"
struct CompositeUniforms {
    displacement: f32,
    blend_gain: f32,
    time: f32,
    _padding: f32,
};

@group(0) @binding(0) var flow_map: texture_2d<f32>;
@group(0) @binding(1) var flow_sampler: sampler;
@group(0) @binding(2) var image: texture_2d<f32>;
@group(0) @binding(3) var image_sampler: sampler;
@group(0) @binding(4) var paper: texture_2d<f32>;
@group(0) @binding(5) var paper_sampler: sampler;
@group(0) @binding(6) var<uniform> grade: CompositeUniforms;

@fragment
fn fs_composite(in: VertexOutput) -> @location(0) vec4<f32> {
    let flow = textureSample(flow_map, flow_sampler, in.tex_uv).rgb;

    // Right and up in image space; tex_uv runs y-down
    let uv = in.tex_uv + vec2<f32>(flow.r, -flow.r) * grade.displacement;
    let tex = textureSample(image, image_sampler, uv).rgb;
    let gray = dot(tex, LUMA);

    let paper_rgb = textureSample(paper, paper_sampler, in.tex_uv).rgb;
    let inked = mix(paper_rgb, vec3<f32>(gray) * paper_rgb, min(1.0, flow.r * flow.r * grade.blend_gain));
    let rgb = mix(tex, inked, min(1.0, flow.b * flow.b * grade.blend_gain));

    return vec4<f32>(rgb, 1.0);
}
"#;

pub(crate) fn composite_shader() -> String {
    shader_utils::with_utils(COMPOSITE_WGSL)
}

/// Renders the final frame from the flowmap output, the source image and
/// the paper texture.
///
/// Holds no per-frame state. The bind group for a given flow surface is
/// built on first use and reused while that surface lives.
pub struct CompositingStage {
    ctx: Arc<GpuContext>,
    config: CompositeConfig,
    flow_filter: FilterMode,
    pipeline: wgpu::RenderPipeline,
    layout: wgpu::BindGroupLayout,
    uniform_buffer: wgpu::Buffer,
    flow_sampler: wgpu::Sampler,
    image: GpuTexture,
    paper: GpuTexture,
    bind_groups: HashMap<SurfaceId, wgpu::BindGroup>,
}

impl CompositingStage {
    /// Build the pipeline for `target_format`.
    ///
    /// `flow_filter` must match the filter negotiated for the flowmap
    /// surfaces; unfilterable float surfaces need a non-filtering sampler.
    pub fn new(
        ctx: Arc<GpuContext>,
        flow_filter: FilterMode,
        target_format: wgpu::TextureFormat,
        image: &TextureConfig,
        paper: &TextureConfig,
        config: CompositeConfig,
    ) -> Self {
        let device = &ctx.device;

        let image = GpuTexture::new(device, &ctx.queue, image, "Composite Image");
        let paper = GpuTexture::new(device, &ctx.queue, paper, "Composite Paper");

        let flow_sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Flowmap Sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: flow_filter.to_wgpu(),
            min_filter: flow_filter.to_wgpu(),
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        let uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Composite Uniform Buffer"),
            size: std::mem::size_of::<CompositeUniforms>() as wgpu::BufferAddress,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let flow_filterable = flow_filter.is_filtering();
        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Composite Bind Group Layout"),
            entries: &[
                texture_entry(0, flow_filterable),
                sampler_entry(1, flow_filterable),
                texture_entry(2, true),
                sampler_entry(3, true),
                texture_entry(4, true),
                sampler_entry(5, true),
                wgpu::BindGroupLayoutEntry {
                    binding: 6,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Composite Shader"),
            source: wgpu::ShaderSource::Wgsl(composite_shader().into()),
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Composite Pipeline Layout"),
            bind_group_layouts: &[&layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Composite Pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_fullscreen"),
                buffers: &[],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_composite"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: target_format,
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
            ctx,
            config,
            flow_filter,
            pipeline,
            layout,
            uniform_buffer,
            flow_sampler,
            image,
            paper,
            bind_groups: HashMap::new(),
        }
    }

    /// Record the compositing pass into `encoder`, drawing into `target`.
    pub fn render(
        &mut self,
        encoder: &mut wgpu::CommandEncoder,
        target: &wgpu::TextureView,
        flow: &RenderSurface,
        time: f32,
    ) -> Result<(), FlowmapError> {
        if self.ctx.is_lost() {
            return Err(FlowmapError::ContextLost);
        }
        if flow.filter() != self.flow_filter {
            log::warn!(
                "flow surface uses {:?} filtering but the compositor was built for {:?}",
                flow.filter(),
                self.flow_filter
            );
        }

        let uniforms = CompositeUniforms {
            displacement: self.config.displacement,
            blend_gain: self.config.blend_gain,
            time,
            _padding: 0.0,
        };
        self.ctx
            .queue
            .write_buffer(&self.uniform_buffer, 0, bytemuck::bytes_of(&uniforms));

        if !self.bind_groups.contains_key(&flow.id())
            && self.bind_groups.len() >= MAX_CACHED_BIND_GROUPS
        {
            self.bind_groups.clear();
        }
        let bind_group = self.bind_groups.entry(flow.id()).or_insert_with(|| {
            composite_bind_group(
                &self.ctx.device,
                &self.layout,
                flow,
                &self.flow_sampler,
                &self.image,
                &self.paper,
                &self.uniform_buffer,
            )
        });

        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Composite Pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: target,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        pass.set_pipeline(&self.pipeline);
        pass.set_bind_group(0, &*bind_group, &[]);
        pass.draw(0..3, 0..1);

        Ok(())
    }

    /// Replace the source image.
    pub fn set_image(&mut self, image: &TextureConfig) {
        let old = std::mem::replace(
            &mut self.image,
            GpuTexture::new(&self.ctx.device, &self.ctx.queue, image, "Composite Image"),
        );
        self.bind_groups.clear();
        old.destroy();
    }

    /// Replace the paper texture.
    pub fn set_paper(&mut self, paper: &TextureConfig) {
        let old = std::mem::replace(
            &mut self.paper,
            GpuTexture::new(&self.ctx.device, &self.ctx.queue, paper, "Composite Paper"),
        );
        self.bind_groups.clear();
        old.destroy();
    }

    pub fn config(&self) -> &CompositeConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: CompositeConfig) {
        self.config = config;
    }

    /// Destroy the image and paper textures now.
    pub fn dispose(self) {
        self.image.destroy();
        self.paper.destroy();
        log::debug!("compositor textures released");
    }
}

fn composite_bind_group(
    device: &wgpu::Device,
    layout: &wgpu::BindGroupLayout,
    flow: &RenderSurface,
    flow_sampler: &wgpu::Sampler,
    image: &GpuTexture,
    paper: &GpuTexture,
    uniform_buffer: &wgpu::Buffer,
) -> wgpu::BindGroup {
    device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("Composite Bind Group"),
        layout,
        entries: &[
            wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::TextureView(flow.view()),
            },
            wgpu::BindGroupEntry {
                binding: 1,
                resource: wgpu::BindingResource::Sampler(flow_sampler),
            },
            wgpu::BindGroupEntry {
                binding: 2,
                resource: wgpu::BindingResource::TextureView(&image.view),
            },
            wgpu::BindGroupEntry {
                binding: 3,
                resource: wgpu::BindingResource::Sampler(&image.sampler),
            },
            wgpu::BindGroupEntry {
                binding: 4,
                resource: wgpu::BindingResource::TextureView(&paper.view),
            },
            wgpu::BindGroupEntry {
                binding: 5,
                resource: wgpu::BindingResource::Sampler(&paper.sampler),
            },
            wgpu::BindGroupEntry {
                binding: 6,
                resource: uniform_buffer.as_entire_binding(),
            },
        ],
    })
}

fn texture_entry(binding: u32, filterable: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Texture {
            sample_type: wgpu::TextureSampleType::Float { filterable },
            view_dimension: wgpu::TextureViewDimension::D2,
            multisampled: false,
        },
        count: None,
    }
}

fn sampler_entry(binding: u32, filtering: bool) -> wgpu::BindGroupLayoutEntry {
    let ty = if filtering {
        wgpu::SamplerBindingType::Filtering
    } else {
        wgpu::SamplerBindingType::NonFiltering
    };
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Sampler(ty),
        count: None,
    }
}
