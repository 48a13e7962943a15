//! Windowed runner: pointer → flowmap → compositor → present.
//!
//! ```ignore
//! let image = TextureConfig::from_file("photo.jpg")?;
//! FlowmapApp::new(image)
//!     .with_flowmap(FlowmapConfig::for_image().with_dissipation(0.97))
//!     .run()?;
//! ```

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use winit::{
    application::ApplicationHandler,
    event::{ElementState, KeyEvent, WindowEvent},
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    keyboard::{Key, NamedKey},
    window::{Window, WindowId},
};

use crate::composite::CompositeConfig;
use crate::error::{AppError, ConfigError, FlowmapError, GpuError};
use crate::flowmap::{FlowmapConfig, PointerState};
use crate::gpu::{CompositingStage, FlowmapState, GpuContext};
use crate::input::{PointerTracker, VelocityEasing};
use crate::textures::TextureConfig;
use crate::time::FrameClock;

/// Size of the generated paper when none is supplied.
const PAPER_SIZE: u32 = 512;

/// Settings file contents for the binary.
///
/// Missing sections fall back to the image-effect defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "FlowmapConfig::for_image")]
    pub flowmap: FlowmapConfig,
    #[serde(default)]
    pub composite: CompositeConfig,
    #[serde(default)]
    pub easing: VelocityEasing,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            flowmap: FlowmapConfig::for_image(),
            composite: CompositeConfig::default(),
            easing: VelocityEasing::default(),
        }
    }
}

impl Settings {
    /// Parse and range-check a settings file.
    pub fn from_json(json: &str) -> Result<Self, AppError> {
        let settings: Settings = serde_json::from_str(json)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.flowmap.validate()?;
        self.composite.validate()
    }
}

/// The flowmap image effect as a desktop window.
///
/// Use method chaining to configure, then call `.run()` to start.
pub struct FlowmapApp {
    title: String,
    image: TextureConfig,
    paper: Option<TextureConfig>,
    flowmap: FlowmapConfig,
    composite: CompositeConfig,
    easing: VelocityEasing,
}

impl FlowmapApp {
    /// Show `image` with the default image-effect settings.
    pub fn new(image: TextureConfig) -> Self {
        Self {
            title: "inkflow".to_string(),
            image,
            paper: None,
            flowmap: FlowmapConfig::for_image(),
            composite: CompositeConfig::default(),
            easing: VelocityEasing::default(),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_image(mut self, image: TextureConfig) -> Self {
        self.image = image;
        self
    }

    /// Use `paper` instead of the generated grain.
    pub fn with_paper(mut self, paper: TextureConfig) -> Self {
        self.paper = Some(paper);
        self
    }

    pub fn with_flowmap(mut self, config: FlowmapConfig) -> Self {
        self.flowmap = config;
        self
    }

    pub fn with_composite(mut self, config: CompositeConfig) -> Self {
        self.composite = config;
        self
    }

    pub fn with_easing(mut self, easing: VelocityEasing) -> Self {
        self.easing = easing;
        self
    }

    /// Apply every section of a settings file.
    pub fn with_settings(self, settings: Settings) -> Self {
        self.with_flowmap(settings.flowmap)
            .with_composite(settings.composite)
            .with_easing(settings.easing)
    }

    /// Run the effect. Blocks until the window is closed.
    pub fn run(self) -> Result<(), AppError> {
        let event_loop = EventLoop::new()?;
        event_loop.set_control_flow(ControlFlow::Poll);

        let paper = self
            .paper
            .clone()
            .unwrap_or_else(|| TextureConfig::paper(PAPER_SIZE, 1));
        let tracker = PointerTracker::new().with_easing(self.easing);

        let mut app = App {
            settings: self,
            paper,
            window: None,
            renderer: None,
            tracker,
            clock: FrameClock::new(Instant::now()),
            error: None,
        };
        event_loop.run_app(&mut app)?;

        match app.error.take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Why a frame was not presented.
enum FrameError {
    Surface(wgpu::SurfaceError),
    Flowmap(FlowmapError),
}

impl From<FlowmapError> for FrameError {
    fn from(e: FlowmapError) -> Self {
        FrameError::Flowmap(e)
    }
}

/// Everything that lives on the GPU. Rebuilt as a whole when the device is
/// lost.
struct Renderer {
    ctx: Arc<GpuContext>,
    surface: wgpu::Surface<'static>,
    surface_config: wgpu::SurfaceConfiguration,
    flowmap: FlowmapState,
    compositor: CompositingStage,
}

impl Renderer {
    fn new(window: Arc<Window>, settings: &FlowmapApp, paper: &TextureConfig) -> Result<Self, GpuError> {
        let size = window.inner_size();
        let (ctx, surface) = pollster::block_on(GpuContext::for_window(window))?;
        let ctx = Arc::new(ctx);

        let mut surface_config = surface
            .get_default_config(&ctx.adapter, size.width.max(1), size.height.max(1))
            .ok_or(GpuError::SurfaceUnsupported)?;

        // The grading math is done in the image's own encoding.
        let caps = surface.get_capabilities(&ctx.adapter);
        if let Some(format) = caps.formats.iter().find(|f| !f.is_srgb()) {
            surface_config.format = *format;
        }
        surface_config.present_mode = wgpu::PresentMode::AutoVsync;
        surface.configure(&ctx.device, &surface_config);
        log::info!(
            "surface {}x{} {:?}",
            surface_config.width,
            surface_config.height,
            surface_config.format
        );

        let flowmap = FlowmapState::new(ctx.clone(), settings.flowmap.clone());
        let compositor = CompositingStage::new(
            ctx.clone(),
            flowmap.filter(),
            surface_config.format,
            &settings.image,
            paper,
            settings.composite,
        );

        Ok(Self {
            ctx,
            surface,
            surface_config,
            flowmap,
            compositor,
        })
    }

    fn resize(&mut self, width: u32, height: u32) {
        if width > 0 && height > 0 {
            self.surface_config.width = width;
            self.surface_config.height = height;
            self.reconfigure();
        }
    }

    fn reconfigure(&mut self) {
        self.surface.configure(&self.ctx.device, &self.surface_config);
    }

    fn aspect(&self) -> f32 {
        self.surface_config.width as f32 / self.surface_config.height.max(1) as f32
    }

    fn frame(&mut self, pointer: PointerState, time: f32) -> Result<(), FrameError> {
        self.flowmap.set_input(pointer);
        self.flowmap.set_aspect(self.aspect());

        let output = self
            .surface
            .get_current_texture()
            .map_err(FrameError::Surface)?;
        let view = output
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());

        let mut encoder = self
            .ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Frame Encoder"),
            });

        // The compositor samples the surface this step writes.
        self.flowmap.encode_advance(&mut encoder)?;
        self.compositor
            .render(&mut encoder, &view, self.flowmap.output(), time)?;

        self.ctx.queue.submit(std::iter::once(encoder.finish()));
        output.present();
        Ok(())
    }

    fn dispose(self) {
        self.flowmap.dispose();
        self.compositor.dispose();
    }
}

struct App {
    settings: FlowmapApp,
    paper: TextureConfig,
    window: Option<Arc<Window>>,
    renderer: Option<Renderer>,
    tracker: PointerTracker,
    clock: FrameClock,
    error: Option<AppError>,
}

impl App {
    fn fail(&mut self, event_loop: &ActiveEventLoop, error: AppError) {
        log::error!("{}", error);
        self.error = Some(error);
        event_loop.exit();
    }

    fn build_renderer(&mut self, event_loop: &ActiveEventLoop, window: Arc<Window>) {
        match Renderer::new(window, &self.settings, &self.paper) {
            Ok(renderer) => self.renderer = Some(renderer),
            Err(e) => self.fail(event_loop, e.into()),
        }
    }

    fn redraw(&mut self, event_loop: &ActiveEventLoop) {
        let Some(renderer) = self.renderer.as_mut() else {
            return;
        };

        let pointer = self.tracker.sample_frame();
        let time = self.clock.tick(Instant::now());

        match renderer.frame(pointer.state(), time) {
            Ok(()) => {}
            Err(FrameError::Surface(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated)) => {
                renderer.reconfigure();
            }
            Err(FrameError::Surface(wgpu::SurfaceError::OutOfMemory)) => {
                log::error!("out of GPU memory, exiting");
                event_loop.exit();
            }
            Err(FrameError::Surface(e)) => log::warn!("skipped frame: {:?}", e),
            Err(FrameError::Flowmap(FlowmapError::ContextLost)) => {
                log::warn!("GPU context lost, rebuilding renderer");
                // Resources of a lost device cannot be destroyed; just drop them
                self.renderer = None;
                if let Some(window) = self.window.clone() {
                    self.build_renderer(event_loop, window);
                }
            }
            Err(FrameError::Flowmap(e)) => log::error!("render error: {}", e),
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let window_attrs = Window::default_attributes()
            .with_title(self.settings.title.clone())
            .with_inner_size(winit::dpi::LogicalSize::new(
                self.settings.image.width.clamp(256, 1600),
                self.settings.image.height.clamp(256, 1000),
            ));

        let window = match event_loop.create_window(window_attrs) {
            Ok(window) => Arc::new(window),
            Err(e) => return self.fail(event_loop, e.into()),
        };

        let size = window.inner_size();
        self.tracker.set_window_size(size.width, size.height);
        self.window = Some(window.clone());
        self.build_renderer(event_loop, window);
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested
            | WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        logical_key: Key::Named(NamedKey::Escape),
                        state: ElementState::Pressed,
                        ..
                    },
                ..
            } => {
                if let Some(renderer) = self.renderer.take() {
                    renderer.dispose();
                }
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                self.tracker.handle_event(&event, Instant::now());
                if let Some(renderer) = &mut self.renderer {
                    renderer.resize(size.width, size.height);
                }
            }
            WindowEvent::CursorMoved { .. } | WindowEvent::CursorLeft { .. } => {
                self.tracker.handle_event(&event, Instant::now());
            }
            WindowEvent::Occluded(hidden) => {
                if hidden {
                    self.clock.pause(Instant::now());
                } else {
                    self.clock.resume(Instant::now());
                }
            }
            WindowEvent::RedrawRequested => {
                self.redraw(event_loop);
                if let Some(window) = &self.window {
                    window.request_redraw();
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_settings_use_image_defaults() {
        let settings = Settings::from_json("{}").unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.flowmap.size, FlowmapConfig::IMAGE_SIZE);
        assert_eq!(settings.composite.displacement, 0.01);
    }

    #[test]
    fn test_partial_sections() {
        let settings = Settings::from_json(
            r#"{ "flowmap": { "dissipation": 0.9 }, "composite": { "blend_gain": 4.0 } }"#,
        )
        .unwrap();
        // A section present in the file starts from the per-field defaults
        assert_eq!(settings.flowmap.dissipation, 0.9);
        assert_eq!(settings.flowmap.falloff, 0.3);
        assert_eq!(settings.composite.blend_gain, 4.0);
        assert_eq!(settings.composite.displacement, 0.01);
    }

    #[test]
    fn test_bad_settings_are_config_errors() {
        let err = Settings::from_json(r#"{ "flowmap": { "precision": "quad" } }"#).unwrap_err();
        assert!(matches!(err, AppError::Config(ConfigError::Parse(_))));
    }

    #[test]
    fn test_out_of_range_settings_are_rejected() {
        let err = Settings::from_json(
            r#"{ "flowmap": { "size": 0, "dissipation": 1.5, "alpha": 7.0 } }"#,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            AppError::Config(ConfigError::OutOfRange { field: "flowmap.size", .. })
        ));

        let err = Settings::from_json(r#"{ "flowmap": { "dissipation": 1.5 } }"#).unwrap_err();
        assert!(matches!(
            err,
            AppError::Config(ConfigError::OutOfRange { field: "flowmap.dissipation", .. })
        ));

        let err = Settings::from_json(r#"{ "flowmap": { "noise_strength": 3.0 } }"#).unwrap_err();
        assert!(err.to_string().contains("noise_strength"));

        let err = Settings::from_json(r#"{ "composite": { "blend_gain": -2.0 } }"#).unwrap_err();
        assert!(matches!(
            err,
            AppError::Config(ConfigError::OutOfRange { field: "composite.blend_gain", .. })
        ));
    }

    #[test]
    fn test_easing_setting() {
        assert_eq!(Settings::default().easing, VelocityEasing::Constant);
        let settings = Settings::from_json(r#"{ "easing": "fading" }"#).unwrap();
        assert_eq!(settings.easing, VelocityEasing::Fading);
    }

    #[test]
    fn test_settings_round_trip_through_example_output() {
        let json = serde_json::to_string_pretty(&Settings::default()).unwrap();
        assert_eq!(Settings::from_json(&json).unwrap(), Settings::default());
    }

    #[test]
    fn test_builder_applies_settings() {
        let settings = Settings {
            flowmap: FlowmapConfig::new(64),
            composite: CompositeConfig::default().with_blend_gain(2.0),
            easing: VelocityEasing::Fading,
        };
        let app = FlowmapApp::new(TextureConfig::solid(0, 0, 0, 255)).with_settings(settings);
        assert_eq!(app.flowmap.size, 64);
        assert_eq!(app.composite.blend_gain, 2.0);
        assert_eq!(app.easing, VelocityEasing::Fading);
        assert!(app.paper.is_none());
    }
}
