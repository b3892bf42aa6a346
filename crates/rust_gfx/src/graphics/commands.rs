//! Render-thread command recording
//!
//! A [`CommandQueue`] records one frame of commands against resource handles
//! and submits it through the backend's queue facet. Recorded commands keep
//! strong references to every object they touch until the device reports
//! the submission complete, so releasing a token mid-frame never frees
//! something the device is still reading.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::backend::{Backend, DeviceCommand, PresentTarget, TextureKind};
use crate::error::{GfxError, GfxResult};
use crate::graphics::resources::{BindingObject, RenderTexture, ShaderDataBinding, TextureObject};
use crate::graphics::Rect2D;
use crate::present::WindowSurface;

enum Recorded<B: Backend> {
    SetShaderDataBinding(Arc<BindingObject<B>>),
    SetRenderTarget(Arc<TextureObject<B>>),
    SetViewport(Rect2D),
    SetScissor(Rect2D),
    SetClearColor([f32; 4]),
    ClearTarget {
        color: bool,
        depth: bool,
    },
    Draw {
        start: u32,
        count: u32,
    },
    DrawIndexed {
        start: u32,
        count: u32,
    },
    DrawInstances {
        start: u32,
        count: u32,
        instances: u32,
    },
    ResolveBindTexture {
        texture: Arc<TextureObject<B>>,
        rect: Rect2D,
        top_left_origin: bool,
        color: bool,
        depth: bool,
    },
    ResolveDisplay(Arc<TextureObject<B>>),
}

impl<B: Backend> Recorded<B> {
    fn lower(&self) -> DeviceCommand<'_, B> {
        match self {
            Self::SetShaderDataBinding(binding) => DeviceCommand::SetShaderDataBinding(&binding.raw),
            Self::SetRenderTarget(texture) => DeviceCommand::SetRenderTarget(&texture.raw),
            Self::SetViewport(rect) => DeviceCommand::SetViewport(*rect),
            Self::SetScissor(rect) => DeviceCommand::SetScissor(*rect),
            Self::SetClearColor(color) => DeviceCommand::SetClearColor(*color),
            Self::ClearTarget { color, depth } => DeviceCommand::ClearTarget {
                color: *color,
                depth: *depth,
            },
            Self::Draw { start, count } => DeviceCommand::Draw {
                start: *start,
                count: *count,
            },
            Self::DrawIndexed { start, count } => DeviceCommand::DrawIndexed {
                start: *start,
                count: *count,
            },
            Self::DrawInstances {
                start,
                count,
                instances,
            } => DeviceCommand::DrawInstances {
                start: *start,
                count: *count,
                instances: *instances,
            },
            Self::ResolveBindTexture {
                texture,
                rect,
                top_left_origin,
                color,
                depth,
            } => DeviceCommand::ResolveBindTexture {
                texture: &texture.raw,
                rect: *rect,
                top_left_origin: *top_left_origin,
                color: *color,
                depth: *depth,
            },
            Self::ResolveDisplay(texture) => DeviceCommand::ResolveDisplay(&texture.raw),
        }
    }
}

/// Records frames on the render thread and tracks them until the device is done
pub struct CommandQueue<B: Backend> {
    recording: Vec<Recorded<B>>,
    in_flight: VecDeque<(u64, Vec<Recorded<B>>)>,
    binding: Option<Arc<BindingObject<B>>>,
    has_target: bool,
    frames_in_flight: usize,
    backend: Arc<B>,
}

impl<B: Backend> CommandQueue<B> {
    /// Queue that lets up to `frames_in_flight` frames run ahead of the device
    pub fn new(backend: &Arc<B>, frames_in_flight: usize) -> Self {
        Self {
            recording: Vec::new(),
            in_flight: VecDeque::new(),
            binding: None,
            has_target: false,
            frames_in_flight: frames_in_flight.max(1),
            backend: Arc::clone(backend),
        }
    }

    /// Bind a pipeline and its inputs for the following draws
    pub fn set_shader_data_binding(&mut self, binding: &ShaderDataBinding<B>) {
        let object = binding.live();
        self.binding = Some(Arc::clone(&object));
        self.recording.push(Recorded::SetShaderDataBinding(object));
    }

    /// Direct the following clears and draws into `target`
    pub fn set_render_target(&mut self, target: &RenderTexture<B>) {
        self.has_target = true;
        self.recording.push(Recorded::SetRenderTarget(target.live()));
    }

    /// Set the viewport
    pub fn set_viewport(&mut self, rect: Rect2D) {
        self.recording.push(Recorded::SetViewport(rect));
    }

    /// Set the scissor rectangle
    pub fn set_scissor(&mut self, rect: Rect2D) {
        self.recording.push(Recorded::SetScissor(rect));
    }

    /// Color used by later clears
    pub fn set_clear_color(&mut self, rgba: [f32; 4]) {
        self.recording.push(Recorded::SetClearColor(rgba));
    }

    /// Clear the current render target
    pub fn clear_target(&mut self, color: bool, depth: bool) {
        assert!(self.has_target, "clear recorded without a render target");
        self.recording.push(Recorded::ClearTarget { color, depth });
    }

    fn check_draw(&self) -> &BindingObject<B> {
        assert!(self.has_target, "draw recorded without a render target");
        match &self.binding {
            Some(binding) => binding,
            None => panic!("draw recorded without a shader data binding"),
        }
    }

    /// Draw `count` vertices starting at `start`
    pub fn draw(&mut self, start: u32, count: u32) {
        self.check_draw();
        self.recording.push(Recorded::Draw { start, count });
    }

    /// Draw `count` indices starting at `start`
    pub fn draw_indexed(&mut self, start: u32, count: u32) {
        assert!(
            self.check_draw().index_buffer.is_some(),
            "indexed draw recorded with a binding that has no index buffer"
        );
        self.recording.push(Recorded::DrawIndexed { start, count });
    }

    /// Draw `instances` copies of `count` vertices starting at `start`
    pub fn draw_instances(&mut self, start: u32, count: u32, instances: u32) {
        self.check_draw();
        self.recording.push(Recorded::DrawInstances {
            start,
            count,
            instances,
        });
    }

    /// Copy part of a render texture into its sampleable images
    ///
    /// # Panics
    /// If a requested attachment was not enabled for shader binding.
    pub fn resolve_bind_texture(
        &mut self,
        texture: &RenderTexture<B>,
        rect: Rect2D,
        top_left_origin: bool,
        color: bool,
        depth: bool,
    ) {
        let object = texture.live();
        if let TextureKind::Render {
            color_binding,
            depth_binding,
            ..
        } = object.desc.kind
        {
            assert!(!color || color_binding, "color resolve of a render texture without a color binding");
            assert!(!depth || depth_binding, "depth resolve of a render texture without a depth binding");
        }
        self.recording.push(Recorded::ResolveBindTexture {
            texture: object,
            rect,
            top_left_origin,
            color,
            depth,
        });
    }

    /// Copy a render texture to the back buffer acquired for this frame
    pub fn resolve_display(&mut self, texture: &RenderTexture<B>) {
        self.recording.push(Recorded::ResolveDisplay(texture.live()));
    }

    /// Commands recorded since the last submission
    pub fn recorded_commands(&self) -> usize {
        self.recording.len()
    }

    /// Submitted frames the device may still be reading
    pub fn pending_frames(&self) -> usize {
        self.in_flight.len()
    }

    fn take_recording(&mut self) -> Vec<Recorded<B>> {
        self.binding = None;
        self.has_target = false;
        std::mem::take(&mut self.recording)
    }

    /// Wait for the oldest frame while too many are in flight
    fn throttle(&mut self) -> GfxResult<()> {
        while self.in_flight.len() >= self.frames_in_flight {
            let Some((generation, _)) = self.in_flight.front() else {
                break;
            };
            self.backend.wait_for_generation(*generation)?;
            self.in_flight.pop_front();
        }
        Ok(())
    }

    fn track(&mut self, generation: u64, recorded: Vec<Recorded<B>>) {
        self.in_flight.push_back((generation, recorded));
        self.release_completed();
    }

    /// Submit the recorded commands without presenting
    ///
    /// Used for offscreen work. `resolve_display` has no effect without a
    /// back buffer.
    pub fn submit(&mut self) -> GfxResult<u64> {
        self.throttle()?;
        let recorded = self.take_recording();
        let commands: Vec<_> = recorded.iter().map(Recorded::lower).collect();
        let generation = self.backend.submit(&commands, None)?;
        drop(commands);
        self.track(generation, recorded);
        Ok(generation)
    }

    /// Acquire a back buffer, submit the recorded frame into it and present it
    ///
    /// If the surface cannot be acquired the recorded frame is dropped and
    /// the error is returned; the surface has already started rebuilding when
    /// the error is [`GfxError::SurfaceOutOfDate`].
    pub fn execute(&mut self, surface: &mut WindowSurface<B>) -> GfxResult<u64> {
        self.throttle()?;
        let recorded = self.take_recording();

        let index = surface.acquire_next_buffer()?;
        let generation = {
            let commands: Vec<_> = recorded.iter().map(Recorded::lower).collect();
            let chain = surface
                .active_chain_mut()
                .ok_or_else(|| GfxError::Backend("surface has no active swap chain".to_string()))?;
            self.backend.submit(&commands, Some(PresentTarget { chain, index }))?
        };
        self.in_flight.push_back((generation, recorded));

        let presented = surface.present(index);
        self.release_completed();
        presented.map(|()| generation)
    }

    /// Drop references held by frames the device has finished
    ///
    /// Returns the number of frames released.
    pub fn release_completed(&mut self) -> usize {
        let completed = match self.backend.completed_generation() {
            Ok(generation) => generation,
            Err(err) => {
                log::warn!("[RETIRE] Could not query completed generation: {err}");
                return 0;
            }
        };

        let mut released = 0;
        while self.in_flight.front().is_some_and(|(generation, _)| *generation <= completed) {
            self.in_flight.pop_front();
            released += 1;
        }
        released
    }

    /// Block until every submitted frame is complete and release them
    pub fn wait_idle(&mut self) -> GfxResult<()> {
        if let Some((generation, _)) = self.in_flight.back() {
            self.backend.wait_for_generation(*generation)?;
        }
        self.in_flight.clear();
        Ok(())
    }
}

impl<B: Backend> Drop for CommandQueue<B> {
    fn drop(&mut self) {
        if let Err(err) = self.wait_idle() {
            log::warn!("[RETIRE] Dropping command queue with frames in flight: {err}");
        }
    }
}
