//! Spinning triangle demo
//!
//! Commits one batch of resources, renders into a render texture every frame
//! and resolves it to the window. Resizing the window exercises the
//! double-slot swap chain. Pass `--headless` (or set `backend = "headless"`
//! in `gfx_demo.toml`) to run a fixed number of frames without a window.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use glfw::{Action, Key, WindowEvent};
use thiserror::Error;

use rust_gfx::config::ConfigError;
use rust_gfx::foundation::logging;
use rust_gfx::graphics::{
    DynamicBuffer, PipelineState, RenderTexture, ShaderDataBinding, ShaderSource, VertexSemantic,
};
use rust_gfx::prelude::*;
use rust_gfx::window::{GlfwWindow, WindowError};

const CONFIG_PATH: &str = "gfx_demo.toml";
const HEADLESS_FRAMES: u32 = 120;

const VERTEX_SHADER: &str = r#"#version 450
layout(location = 0) in vec3 in_position;
layout(location = 1) in vec4 in_color;

layout(set = 0, binding = 0) uniform Transform {
    mat4 mvp;
} transform;

layout(location = 0) out vec4 v_color;

void main() {
    v_color = in_color;
    gl_Position = transform.mvp * vec4(in_position, 1.0);
}
"#;

const FRAGMENT_SHADER: &str = r#"#version 450
layout(location = 0) in vec4 v_color;
layout(location = 0) out vec4 out_color;

void main() {
    out_color = v_color;
}
"#;

/// Position and color for three vertices
const TRIANGLE: [f32; 21] = [
    0.0, -0.5, 0.0, 1.0, 0.0, 0.0, 1.0, //
    0.5, 0.5, 0.0, 0.0, 1.0, 0.0, 1.0, //
    -0.5, 0.5, 0.0, 0.0, 0.0, 1.0, 1.0,
];

const ELEMENTS: [VertexElementDescriptor; 2] = [
    VertexElementDescriptor::new(VertexSemantic::Position3, 0),
    VertexElementDescriptor::new(VertexSemantic::Color, 0),
];

#[derive(Error, Debug)]
enum DemoError {
    #[error(transparent)]
    Gfx(#[from] GfxError),

    #[error(transparent)]
    Window(#[from] WindowError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Objects of the committed batch the frame loop uses
struct Scene<B: Backend> {
    uniforms: DynamicBuffer<B>,
    target: RenderTexture<B>,
    binding: ShaderDataBinding<B>,
    extent: Extent2D,
}

fn build_scene<B: Backend>(factory: &DataFactory<B>, extent: Extent2D) -> GfxResult<(GraphicsDataToken<B>, Scene<B>)> {
    let mut scene = None;
    let token = factory.commit_transaction(|ctx| {
        let vertices = ctx.new_static_buffer_typed(BufferUse::Vertex, &TRIANGLE)?;
        let uniforms = ctx.new_dynamic_buffer(BufferUse::Uniform, 64, 1)?;
        let format = ctx.new_vertex_format(&ELEMENTS)?;
        let pipeline = ctx.new_shader_pipeline(
            ShaderSource::new(VERTEX_SHADER, FRAGMENT_SHADER),
            None,
            &format,
            PipelineState::default(),
        )?;
        let target = ctx.new_render_texture(extent.width, extent.height, false, false)?;
        let binding = ctx.new_shader_data_binding(
            ShaderDataBindingDesc::new(&pipeline)
                .vertex_format(&format)
                .vertex_buffer(&vertices)
                .uniform(&uniforms, ShaderStages::VERTEX),
        )?;

        scene = Some(Scene {
            uniforms,
            target,
            binding,
            extent,
        });
        Ok(())
    })?;

    let scene = scene.ok_or_else(|| GfxError::Backend("transaction produced no scene".to_string()))?;
    Ok((token, scene))
}

/// Column-major rotation about the z axis
fn rotation_z(angle: f32) -> [f32; 16] {
    let (sin, cos) = angle.sin_cos();
    [
        cos, sin, 0.0, 0.0, //
        -sin, cos, 0.0, 0.0, //
        0.0, 0.0, 1.0, 0.0, //
        0.0, 0.0, 0.0, 1.0,
    ]
}

/// Owns the factory, the committed scene and the frame loop state of one window
struct Renderer<B: Backend> {
    factory: DataFactory<B>,
    queue: CommandQueue<B>,
    surface: WindowSurface<B>,
    scene: Scene<B>,
    token: Option<GraphicsDataToken<B>>,
    start_time: Instant,
}

impl<B: Backend> Renderer<B> {
    fn new(backend: Arc<B>, config: &GfxConfig, surface: WindowSurface<B>) -> GfxResult<Self> {
        let factory = DataFactory::new(Arc::clone(&backend), config);
        let queue = CommandQueue::new(&backend, config.frames_in_flight);
        let (token, scene) = build_scene(&factory, surface.extent())?;

        log::info!("Running on the {} backend", factory.platform_name());
        Ok(Self {
            factory,
            queue,
            surface,
            scene,
            token: Some(token),
            start_time: Instant::now(),
        })
    }

    /// Rebuild the render target when the window size changed
    fn refresh_scene(&mut self) -> GfxResult<()> {
        let extent = self.surface.extent();
        if extent == self.scene.extent || extent.is_empty() {
            return Ok(());
        }

        // Frames in flight may still read the old target; release defers its destruction
        let (token, scene) = build_scene(&self.factory, extent)?;
        if let Some(old) = self.token.replace(token) {
            old.release();
        }
        self.scene = scene;
        log::info!("Rebuilt render target at {}x{}", extent.width, extent.height);
        Ok(())
    }

    fn render_frame(&mut self) -> GfxResult<()> {
        self.refresh_scene()?;

        let angle = self.start_time.elapsed().as_secs_f32();
        self.scene.uniforms.load_typed(&rotation_z(angle))?;

        let extent = self.scene.extent;
        let queue = &mut self.queue;
        queue.set_render_target(&self.scene.target);
        queue.set_viewport(Rect2D::new(0, 0, extent.width, extent.height));
        queue.set_scissor(Rect2D::new(0, 0, extent.width, extent.height));
        queue.set_clear_color([0.05, 0.05, 0.1, 1.0]);
        queue.clear_target(true, true);
        queue.set_shader_data_binding(&self.scene.binding);
        queue.draw(0, 3);
        queue.resolve_display(&self.scene.target);

        match queue.execute(&mut self.surface) {
            Ok(_) => {}
            Err(err) if err.is_surface_out_of_date() => {
                log::debug!("Skipped frame while the swap chain rebuilds");
            }
            Err(err) => return Err(err),
        }

        self.factory.collect_retired();
        Ok(())
    }

    fn shutdown(mut self) -> GfxResult<()> {
        self.queue.wait_idle()?;
        if let Some(token) = self.token.take() {
            token.release();
        }
        let freed = self.factory.collect_retired();
        log::info!(
            "Presented {} frames, freed {freed} batches at shutdown",
            self.surface.presented_frames()
        );
        Ok(())
    }
}

fn run_windowed(config: &GfxConfig) -> Result<(), DemoError> {
    let mut window = GlfwWindow::new(&config.application_name, 800, 600)?;
    let (backend, raw_surface) = VulkanBackend::new(config, &window)?;

    let surface = WindowSurface::new(
        &backend,
        WindowId(0),
        raw_surface,
        window.framebuffer_size(),
        config.swap_chain_buffers,
    );
    let notifier = surface.notifier();
    let mut renderer = Renderer::new(backend, config, surface)?;

    while !window.should_close() {
        window.poll_events();
        let events: Vec<_> = window.flush_events().collect();
        for (_, event) in events {
            match event {
                WindowEvent::FramebufferSize(width, height) => {
                    notifier.notify(Extent2D::new(width.max(0) as u32, height.max(0) as u32));
                }
                WindowEvent::Key(Key::Escape, _, Action::Press, _) | WindowEvent::Close => {
                    window.set_should_close(true);
                }
                _ => {}
            }
        }

        renderer.render_frame()?;
    }

    renderer.shutdown()?;
    Ok(())
}

fn run_headless(config: &GfxConfig) -> Result<(), DemoError> {
    let backend = HeadlessBackend::new(config);
    let raw_surface = backend.create_surface();
    let surface = WindowSurface::new(&backend, WindowId(0), raw_surface, Extent2D::new(800, 600), config.swap_chain_buffers);
    let notifier = surface.notifier();
    let mut renderer = Renderer::new(backend, config, surface)?;

    for frame in 0..HEADLESS_FRAMES {
        // Simulate a window being dragged larger halfway through
        if frame == HEADLESS_FRAMES / 2 {
            notifier.notify(Extent2D::new(1024, 768));
        }
        renderer.render_frame()?;
    }

    renderer.shutdown()?;
    Ok(())
}

fn load_config() -> Result<GfxConfig, ConfigError> {
    let mut config = if Path::new(CONFIG_PATH).exists() {
        GfxConfig::load_from_file(CONFIG_PATH)?
    } else {
        GfxConfig::default()
    };
    config = config.with_application_name("gfx_demo");

    if std::env::args().any(|arg| arg == "--headless") {
        config = config.with_backend(BackendKind::Headless);
    }
    config.validate()?;
    Ok(config)
}

fn main() {
    let config = load_config();
    match &config {
        Ok(config) => logging::init_with_filter(&config.log_filter),
        Err(_) => logging::init(),
    }

    let result = config.map_err(DemoError::from).and_then(|config| {
        log::info!("Starting gfx_demo with {:?} backend", config.backend);
        match config.backend {
            BackendKind::Vulkan => run_windowed(&config),
            BackendKind::Headless => run_headless(&config),
        }
    });

    if let Err(err) = result {
        log::error!("gfx_demo failed: {err}");
        std::process::exit(1);
    }
}
