//! GPU side of the flowmap: the step pipeline and its ping-pong surfaces.

use std::sync::Arc;

use bytemuck::{Pod, Zeroable};

use super::readback::{FloatReadback, FlowPixels};
use super::surface::{RenderSurface, SurfacePair};
use super::{GpuContext, SurfaceSetup};
use crate::error::FlowmapError;
use crate::flowmap::{FlowmapConfig, PointerState, Precision};
use crate::shader_utils;
use crate::textures::FilterMode;

/// Uniforms for the step pass. Layout must match `FlowmapUniforms` in
/// [`STEP_WGSL`].
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub(crate) struct FlowmapUniforms {
    pub mouse: [f32; 2],
    pub velocity: [f32; 2],
    pub falloff: f32,
    pub alpha: f32,
    pub dissipation: f32,
    pub aspect: f32,
    pub noise_strength: f32,
    pub noise_scale: f32,
    pub _padding: [f32; 2],
}

const STEP_WGSL: &str = r#"
struct FlowmapUniforms {
    mouse: vec2<f32>,
    velocity: vec2<f32>,
    falloff: f32,
    alpha: f32,
    dissipation: f32,
    aspect: f32,
    noise_strength: f32,
    noise_scale: f32,
    _padding: vec2<f32>,
};

@group(0) @binding(0) var previous: texture_2d<f32>;
@group(0) @binding(1) var<uniform> flow: FlowmapUniforms;

@fragment
fn fs_step(in: VertexOutput) -> @location(0) vec4<f32> {
    var color = textureLoad(previous, vec2<i32>(in.clip_position.xy), 0) * flow.dissipation;

    var cursor = in.uv - flow.mouse;
    cursor.x *= flow.aspect;

    let speed = flow.velocity * 0.005 * flow.velocity;
    let dist = length(cursor) * 1.0 - min(0.1, length(speed));

    let stamp = falloff_ramp(flow.falloff, 0.1, dist) * flow.alpha;
    let p = in.uv * flow.noise_scale;

    let red_edge = fbm(vec3<f32>(p, 1.0)) * flow.noise_strength;
    if dist + red_edge * dist < 0.1 {
        color.r = mix(color.r, 1.0, stamp);
    }

    let blue_edge = fbm(vec3<f32>(p, 0.0)) * flow.noise_strength;
    if dist + blue_edge * dist < 0.125 {
        color.b = mix(color.b, 1.0, stamp);
    }

    return vec4<f32>(color.rgb, 1.0);
}
"#;

pub(crate) fn step_shader() -> String {
    shader_utils::with_utils(STEP_WGSL)
}

/// A pointer-driven flowmap living on the GPU.
///
/// Two square surfaces alternate as source and destination. Each
/// [`advance`](Self::advance) decays the previous frame and stamps a noisy
/// blot at the pointer, then swaps so [`output`](Self::output) is the
/// surface just written.
///
/// ```ignore
/// let ctx = Arc::new(pollster::block_on(GpuContext::headless())?);
/// let mut flowmap = FlowmapState::new(ctx, FlowmapConfig::default());
/// flowmap.set_input(PointerState::new(Vec2::new(0.5, 0.5), Vec2::ZERO));
/// flowmap.advance()?;
/// let pixels = flowmap.read_pixels()?;
/// ```
pub struct FlowmapState {
    ctx: Arc<GpuContext>,
    config: FlowmapConfig,
    setup: SurfaceSetup,
    surfaces: SurfacePair<RenderSurface>,
    /// Indexed by [`SurfacePair::read_index`]: [reads A, reads B]
    bind_groups: [wgpu::BindGroup; 2],
    pipeline: wgpu::RenderPipeline,
    uniform_buffer: wgpu::Buffer,
    pointer: PointerState,
    aspect: f32,
    readback: Option<FloatReadback>,
}

impl FlowmapState {
    /// Negotiate the surface format, allocate both surfaces cleared to
    /// zero and build the step pipeline.
    ///
    /// Out-of-range config values are clamped, see [`FlowmapConfig::clamped`].
    pub fn new(ctx: Arc<GpuContext>, config: FlowmapConfig) -> Self {
        let clamped = config.clamped();
        if clamped != config {
            log::warn!("flowmap config out of range, clamped to {:?}", clamped);
        }
        let config = clamped;
        let setup = ctx.negotiate(config.requested_precision());
        let device = &ctx.device;
        log::info!(
            "flowmap {}x{} using {:?} ({:?} filtering)",
            config.size,
            config.size,
            setup.format,
            setup.filter
        );

        let surfaces = SurfacePair::new(
            RenderSurface::new(device, "Flowmap Surface A", config.size, setup.format, setup.filter),
            RenderSurface::new(device, "Flowmap Surface B", config.size, setup.format, setup.filter),
        );

        let uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Flowmap Uniform Buffer"),
            size: std::mem::size_of::<FlowmapUniforms>() as wgpu::BufferAddress,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Flowmap Bind Group Layout"),
            entries: &[
                // Previous frame, read with textureLoad
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: false },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
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

        let [a, b] = surfaces.both();
        let bind_groups = [
            create_step_bind_group(device, &layout, a, &uniform_buffer, "Flowmap Bind Group (read A)"),
            create_step_bind_group(device, &layout, b, &uniform_buffer, "Flowmap Bind Group (read B)"),
        ];

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Flowmap Step Shader"),
            source: wgpu::ShaderSource::Wgsl(step_shader().into()),
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Flowmap Pipeline Layout"),
            bind_group_layouts: &[&layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Flowmap Step Pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_fullscreen"),
                buffers: &[],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_step"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: setup.format,
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

        let mut state = Self {
            ctx,
            config,
            setup,
            surfaces,
            bind_groups,
            pipeline,
            uniform_buffer,
            pointer: PointerState::inactive(),
            aspect: 1.0,
            readback: None,
        };
        state.seed([0.0; 4]);
        state
    }

    /// Record the latest pointer sample. Takes effect on the next advance.
    pub fn set_input(&mut self, pointer: PointerState) {
        self.pointer = pointer;
    }

    /// Viewport aspect (width / height) for stamp correction.
    pub fn set_aspect(&mut self, aspect: f32) {
        if aspect.is_finite() && aspect > 0.0 {
            self.aspect = aspect;
        }
    }

    fn uniforms(&self) -> FlowmapUniforms {
        FlowmapUniforms {
            mouse: self.pointer.position.to_array(),
            velocity: self.pointer.velocity.to_array(),
            falloff: self.config.shader_falloff(),
            alpha: self.config.alpha,
            dissipation: self.config.dissipation,
            aspect: if self.config.aspect_correction {
                self.aspect
            } else {
                1.0
            },
            noise_strength: self.config.noise_strength,
            noise_scale: self.config.noise_scale,
            _padding: [0.0; 2],
        }
    }

    /// Run one step on its own command buffer.
    pub fn advance(&mut self) -> Result<(), FlowmapError> {
        let mut encoder = self
            .ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Flowmap Encoder"),
            });
        self.encode_advance(&mut encoder)?;
        self.ctx.queue.submit(std::iter::once(encoder.finish()));
        Ok(())
    }

    /// Record one step into `encoder` and swap.
    ///
    /// The uniforms are written through the queue, so at most one step
    /// should be encoded per submit.
    pub fn encode_advance(&mut self, encoder: &mut wgpu::CommandEncoder) -> Result<(), FlowmapError> {
        if self.ctx.is_lost() {
            return Err(FlowmapError::ContextLost);
        }

        let uniforms = self.uniforms();
        self.ctx
            .queue
            .write_buffer(&self.uniform_buffer, 0, bytemuck::bytes_of(&uniforms));
        log::trace!(
            "flowmap step: mouse {:?} velocity {:?} aspect {}",
            uniforms.mouse,
            uniforms.velocity,
            uniforms.aspect
        );

        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Flowmap Step Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: self.surfaces.write().view(),
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
            pass.set_bind_group(0, &self.bind_groups[self.surfaces.read_index()], &[]);
            pass.draw(0..3, 0..1);
        }

        self.surfaces.swap();
        Ok(())
    }

    /// The most recently written surface.
    pub fn output(&self) -> &RenderSurface {
        self.surfaces.read()
    }

    /// The surface the next step will write.
    pub fn pending_target(&self) -> &RenderSurface {
        self.surfaces.write()
    }

    /// Clear both surfaces to `rgba`. 8-bit surfaces clamp to 0..1.
    pub fn seed(&mut self, rgba: [f32; 4]) {
        let color = wgpu::Color {
            r: rgba[0] as f64,
            g: rgba[1] as f64,
            b: rgba[2] as f64,
            a: rgba[3] as f64,
        };
        let mut encoder = self
            .ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Flowmap Seed Encoder"),
            });
        for surface in self.surfaces.both() {
            encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Flowmap Seed Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: surface.view(),
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(color),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
        }
        self.ctx.queue.submit(std::iter::once(encoder.finish()));
    }

    /// Copy [`Self::output`] to the CPU as 32-bit floats.
    pub fn read_pixels(&mut self) -> Result<FlowPixels, FlowmapError> {
        if self.ctx.is_lost() {
            return Err(FlowmapError::ContextLost);
        }
        let readback = self
            .readback
            .get_or_insert_with(|| FloatReadback::new(&self.ctx.device, self.config.size));
        Ok(readback.read(&self.ctx, self.surfaces.read().view())?)
    }

    pub fn format(&self) -> wgpu::TextureFormat {
        self.setup.format
    }

    pub fn precision(&self) -> Precision {
        self.setup.precision
    }

    pub fn filter(&self) -> FilterMode {
        self.setup.filter
    }

    pub fn config(&self) -> &FlowmapConfig {
        &self.config
    }

    pub fn pointer(&self) -> PointerState {
        self.pointer
    }

    pub fn context(&self) -> &Arc<GpuContext> {
        &self.ctx
    }

    /// Destroy both surfaces now.
    pub fn dispose(self) {
        let (a, b) = self.surfaces.into_inner();
        a.destroy();
        b.destroy();
        log::debug!("flowmap surfaces released");
    }
}

fn create_step_bind_group(
    device: &wgpu::Device,
    layout: &wgpu::BindGroupLayout,
    source: &RenderSurface,
    uniform_buffer: &wgpu::Buffer,
    label: &str,
) -> wgpu::BindGroup {
    device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some(label),
        layout,
        entries: &[
            wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::TextureView(source.view()),
            },
            wgpu::BindGroupEntry {
                binding: 1,
                resource: uniform_buffer.as_entire_binding(),
            },
        ],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shader_utils::tests::validate_wgsl;

    #[test]
    fn test_step_shader_is_valid() {
        validate_wgsl(&step_shader()).expect("Flowmap step shader should be valid");
    }

    #[test]
    fn test_uniform_layout() {
        // Two vec2s, six scalars, vec2 padding: 16-byte multiple
        assert_eq!(std::mem::size_of::<FlowmapUniforms>(), 48);
        assert_eq!(std::mem::size_of::<FlowmapUniforms>() % 16, 0);
    }

    #[test]
    fn test_every_uniform_field_is_read() {
        let shader = step_shader();
        for field in [
            "mouse",
            "velocity",
            "falloff",
            "alpha",
            "dissipation",
            "aspect",
            "noise_strength",
            "noise_scale",
        ] {
            assert!(shader.contains(&format!("flow.{field}")), "flow.{field} unused");
        }
        assert!(!shader.contains("flow.size"));
    }

    #[test]
    fn test_step_keeps_distance_expression() {
        let shader = step_shader();
        assert!(shader.contains("length(cursor) * 1.0 - min(0.1, length(speed))"));
        assert!(shader.contains("< 0.1"));
        assert!(shader.contains("< 0.125"));
        assert!(shader.contains("vec3<f32>(p, 1.0)"));
        assert!(shader.contains("vec3<f32>(p, 0.0)"));
    }
}
