//! Deterministic in-process backend
//!
//! The headless backend stands in for a GPU in tests and offline tools.
//! Objects live in host memory and are counted per kind. The queue hands out
//! generations like a real device, but completion is either immediate or
//! driven by the caller, which makes deferred destruction observable. Swap
//! chains can be given a build latency and surfaces can be invalidated to
//! exercise the resize path.

mod objects;

pub use objects::{
    HeadlessBinding, HeadlessBuffer, HeadlessPipeline, HeadlessSurface, HeadlessSwapChain, HeadlessTexture,
    HeadlessVertexFormat, LiveCounts, ObjectKind,
};

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use objects::LiveCounters;

use crate::backend::{
    Backend, BindingDesc, BufferDesc, DeviceCommand, PipelineDesc, PresentTarget, TextureDesc, TextureKind,
};
use crate::config::{CompletionMode, GfxConfig};
use crate::error::{GfxError, GfxResult};
use crate::graphics::{Extent2D, Platform, VertexLayout};

const PIPELINE_CACHE_MAGIC: &[u8; 4] = b"HLPC";

/// Work counted by the simulated queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueStats {
    /// Frames submitted
    pub submissions: u64,
    /// Draw calls of every kind
    pub draws: u64,
    /// Target clears
    pub clears: u64,
    /// Render texture resolves, bind and display
    pub resolves: u64,
    /// Resolves that averaged the samples of a multisampled render texture
    pub multisample_resolves: u64,
    /// Frames presented
    pub presents: u64,
    /// Binding changes that switched to a different pipeline
    pub pipeline_switches: u64,
}

/// In-process backend with observable object lifetimes
pub struct HeadlessBackend {
    counters: Arc<LiveCounters>,
    /// Allocations allowed before the next one fails
    fail_after: Mutex<Option<usize>>,
    fold_vertex_format: bool,
    draw_samples: u32,
    completion: CompletionMode,
    resize_latency: u32,
    /// Queue lock: serializes submission and present
    queue: Mutex<QueueStats>,
    submitted: AtomicU64,
    completed: AtomicU64,
    surface_epoch: AtomicU64,
    next_surface: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn shader_hash(vertex: &[u32], fragment: &[u32]) -> u64 {
    let mut hasher = DefaultHasher::new();
    vertex.hash(&mut hasher);
    fragment.hash(&mut hasher);
    hasher.finish()
}

fn draw_error(reason: impl Into<String>) -> GfxError {
    GfxError::Backend(format!("invalid draw: {}", reason.into()))
}

fn check_samples(binding: &HeadlessBinding, target: Option<u32>) -> GfxResult<()> {
    match target {
        Some(samples) if samples != binding.samples => Err(draw_error(format!(
            "pipeline built for {} samples drawn into a target with {samples}",
            binding.samples
        ))),
        _ => Ok(()),
    }
}

impl HeadlessBackend {
    /// Create a backend configured from `config.headless`
    pub fn new(config: &GfxConfig) -> Arc<Self> {
        log::info!(
            "[HEADLESS] Created backend ({:?} completion, resize latency {}, {}x samples)",
            config.headless.completion,
            config.headless.resize_latency_frames,
            config.draw_samples
        );
        Arc::new(Self {
            counters: Arc::default(),
            fail_after: Mutex::new(None),
            fold_vertex_format: config.headless.fold_vertex_format,
            draw_samples: config.draw_samples,
            completion: config.headless.completion,
            resize_latency: config.headless.resize_latency_frames,
            queue: Mutex::new(QueueStats::default()),
            submitted: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            surface_epoch: AtomicU64::new(0),
            next_surface: AtomicU64::new(1),
        })
    }

    /// Live objects per kind
    pub fn live_counts(&self) -> LiveCounts {
        LiveCounts::from_counters(&self.counters)
    }

    /// Live objects of one kind
    pub fn live(&self, kind: ObjectKind) -> usize {
        self.counters.get(kind)
    }

    /// Let `allocations` more objects succeed, then fail with `OutOfMemory`
    pub fn fail_allocation_after(&self, allocations: usize) {
        *lock(&self.fail_after) = Some(allocations);
    }

    /// Stop injecting allocation failures
    pub fn clear_allocation_failure(&self) {
        *lock(&self.fail_after) = None;
    }

    fn allocate(&self, requested: usize) -> GfxResult<()> {
        let mut fail_after = lock(&self.fail_after);
        match fail_after.as_mut() {
            Some(0) => {
                log::debug!("[HEADLESS] Injected allocation failure ({requested} bytes)");
                Err(GfxError::OutOfMemory { requested })
            }
            Some(remaining) => {
                *remaining -= 1;
                Ok(())
            }
            None => Ok(()),
        }
    }

    /// Mark every submission up to `generation` as finished
    pub fn complete_through(&self, generation: u64) {
        let generation = generation.min(self.submitted.load(Ordering::Acquire));
        self.completed.fetch_max(generation, Ordering::AcqRel);
    }

    /// Mark every submission as finished
    pub fn complete_all(&self) {
        self.complete_through(u64::MAX);
    }

    /// Make every existing swap chain report an out-of-date surface
    pub fn invalidate_surfaces(&self) {
        let epoch = self.surface_epoch.fetch_add(1, Ordering::AcqRel) + 1;
        log::warn!("[HEADLESS] Surfaces invalidated (epoch {epoch})");
    }

    /// Create a window surface stand-in
    pub fn create_surface(&self) -> HeadlessSurface {
        HeadlessSurface {
            id: self.next_surface.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// Counters of the simulated queue
    pub fn stats(&self) -> QueueStats {
        *lock(&self.queue)
    }

    fn validate(commands: &[DeviceCommand<'_, Self>], stats: &mut QueueStats) -> GfxResult<()> {
        let mut binding: Option<&HeadlessBinding> = None;
        // Sample count of the current render target
        let mut target: Option<u32> = None;

        let check_vertices = |binding: &HeadlessBinding, start: u32, count: u32| -> GfxResult<()> {
            match binding.vertex_capacity {
                Some(capacity) if u64::from(start) + u64::from(count) > u64::from(capacity) => Err(draw_error(format!(
                    "vertices {start}..{} exceed the {capacity} in the vertex buffer",
                    u64::from(start) + u64::from(count)
                ))),
                None if binding.needs_vertices => Err(draw_error("binding has no vertex buffer")),
                _ => Ok(()),
            }
        };

        for command in commands {
            match command {
                DeviceCommand::SetShaderDataBinding(next) => {
                    if binding.map_or(true, |current| current.shader_hash != next.shader_hash) {
                        stats.pipeline_switches += 1;
                    }
                    binding = Some(*next);
                }
                DeviceCommand::SetRenderTarget(texture) => {
                    if !matches!(texture.desc.kind, TextureKind::Render { .. }) {
                        return Err(GfxError::Backend("render target is not a render texture".to_string()));
                    }
                    target = Some(texture.desc.samples());
                }
                DeviceCommand::SetViewport(_) | DeviceCommand::SetScissor(_) | DeviceCommand::SetClearColor(_) => {}
                DeviceCommand::ClearTarget { .. } => {
                    if target.is_none() {
                        return Err(GfxError::Backend("clear without a render target".to_string()));
                    }
                    stats.clears += 1;
                }
                DeviceCommand::Draw { start, count } => {
                    let current = binding.ok_or_else(|| draw_error("no data binding"))?;
                    check_samples(current, target)?;
                    check_vertices(current, *start, *count)?;
                    stats.draws += 1;
                }
                DeviceCommand::DrawIndexed { start, count } => {
                    let current = binding.ok_or_else(|| draw_error("no data binding"))?;
                    check_samples(current, target)?;
                    let capacity = current
                        .index_capacity
                        .ok_or_else(|| draw_error("binding has no index buffer"))?;
                    if u64::from(*start) + u64::from(*count) > u64::from(capacity) {
                        return Err(draw_error(format!(
                            "indices {start}..{} exceed the {capacity} in the index buffer",
                            u64::from(*start) + u64::from(*count)
                        )));
                    }
                    stats.draws += 1;
                }
                DeviceCommand::DrawInstances {
                    start,
                    count,
                    instances,
                } => {
                    let current = binding.ok_or_else(|| draw_error("no data binding"))?;
                    check_samples(current, target)?;
                    check_vertices(current, *start, *count)?;
                    match current.instance_capacity {
                        Some(capacity) if *instances > capacity => {
                            return Err(draw_error(format!(
                                "{instances} instances exceed the {capacity} in the instance buffer"
                            )));
                        }
                        None if current.needs_instances => {
                            return Err(draw_error("binding has no instance buffer"));
                        }
                        _ => {}
                    }
                    stats.draws += 1;
                }
                DeviceCommand::ResolveBindTexture { texture, .. } | DeviceCommand::ResolveDisplay(texture) => {
                    stats.resolves += 1;
                    if texture.desc.samples() > 1 {
                        stats.multisample_resolves += 1;
                    }
                }
            }
        }

        Ok(())
    }

    fn check_surface(&self, chain: &HeadlessSwapChain) -> GfxResult<()> {
        if chain.epoch == self.surface_epoch.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(GfxError::SurfaceOutOfDate)
        }
    }
}

impl Backend for HeadlessBackend {
    type Buffer = HeadlessBuffer;
    type Texture = HeadlessTexture;
    type VertexFormat = HeadlessVertexFormat;
    type Pipeline = HeadlessPipeline;
    type Binding = HeadlessBinding;
    type Surface = HeadlessSurface;
    type SwapChain = HeadlessSwapChain;

    fn platform(&self) -> Platform {
        Platform::Headless
    }

    fn binding_needs_vertex_format(&self) -> bool {
        !self.fold_vertex_format
    }

    fn draw_samples(&self) -> u32 {
        self.draw_samples
    }

    fn create_buffer(&self, desc: &BufferDesc, contents: Option<&[u8]>) -> GfxResult<HeadlessBuffer> {
        self.allocate(desc.size)?;
        Ok(HeadlessBuffer::new(&self.counters, *desc, contents))
    }

    fn write_buffer(&self, buffer: &HeadlessBuffer, data: &[u8]) -> GfxResult<()> {
        if !buffer.desc.dynamic {
            return Err(GfxError::Backend("write to a static buffer".to_string()));
        }
        buffer.write(data);
        Ok(())
    }

    fn create_texture(&self, desc: &TextureDesc, contents: Option<&[u8]>) -> GfxResult<HeadlessTexture> {
        self.allocate(desc.data_size())?;
        Ok(HeadlessTexture::new(&self.counters, *desc, contents))
    }

    fn write_texture(&self, texture: &HeadlessTexture, data: &[u8]) -> GfxResult<()> {
        texture.write(data);
        Ok(())
    }

    fn create_vertex_format(&self, layout: &VertexLayout) -> GfxResult<HeadlessVertexFormat> {
        self.allocate(0)?;
        Ok(HeadlessVertexFormat::new(&self.counters, layout.clone()))
    }

    fn create_pipeline(&self, desc: &PipelineDesc<'_, Self>) -> GfxResult<(HeadlessPipeline, Vec<u8>)> {
        let hash = shader_hash(desc.vertex, desc.fragment);

        if !desc.cache.is_empty() {
            let valid = desc.cache.len() == 12
                && &desc.cache[..4] == PIPELINE_CACHE_MAGIC
                && desc.cache[4..] == hash.to_le_bytes();
            if !valid {
                return Err(GfxError::InvalidShaderBlob {
                    reason: "pipeline cache was not produced for these shaders".to_string(),
                });
            }
        }
        if desc.vertex_format.layout != *desc.layout {
            return Err(GfxError::Backend("vertex format does not match its layout".to_string()));
        }

        self.allocate(0)?;
        let mut cache = PIPELINE_CACHE_MAGIC.to_vec();
        cache.extend_from_slice(&hash.to_le_bytes());
        Ok((HeadlessPipeline::new(&self.counters, hash, self.draw_samples), cache))
    }

    fn create_binding(&self, desc: &BindingDesc<'_, Self>) -> GfxResult<HeadlessBinding> {
        if self.binding_needs_vertex_format() && desc.vertex_format.is_none() {
            return Err(GfxError::Backend("binding needs a vertex format".to_string()));
        }

        self.allocate(0)?;
        Ok(HeadlessBinding::new(
            &self.counters,
            desc.pipeline,
            desc.layout,
            desc.vertex_buffer.map(|(_, size)| size),
            desc.instance_buffer.map(|(_, size)| size),
            desc.index_buffer.map(|(_, size)| size),
        ))
    }

    fn submit(&self, commands: &[DeviceCommand<'_, Self>], target: Option<PresentTarget<'_, Self>>) -> GfxResult<u64> {
        let mut queue = lock(&self.queue);
        let mut stats = *queue;
        Self::validate(commands, &mut stats)?;

        if let Some(target) = target {
            self.check_surface(target.chain)?;
            if target.chain.acquired != Some(target.index) {
                return Err(GfxError::Backend(format!(
                    "buffer {} was not acquired before submission",
                    target.index
                )));
            }
        }

        stats.submissions += 1;
        *queue = stats;

        let generation = self.submitted.fetch_add(1, Ordering::AcqRel) + 1;
        if self.completion == CompletionMode::Immediate {
            self.completed.fetch_max(generation, Ordering::AcqRel);
        }
        log::trace!("[HEADLESS] Submitted generation {generation} ({} commands)", commands.len());
        Ok(generation)
    }

    fn submitted_generation(&self) -> u64 {
        self.submitted.load(Ordering::Acquire)
    }

    fn completed_generation(&self) -> GfxResult<u64> {
        Ok(self.completed.load(Ordering::Acquire))
    }

    fn wait_for_generation(&self, generation: u64) -> GfxResult<()> {
        // Nothing runs asynchronously, so waiting finishes the work
        self.complete_through(generation);
        Ok(())
    }

    fn create_swap_chain(
        &self,
        surface: &mut HeadlessSurface,
        extent: Extent2D,
        buffers: u32,
        previous: Option<&HeadlessSwapChain>,
    ) -> GfxResult<HeadlessSwapChain> {
        if extent.is_empty() {
            return Err(GfxError::SurfaceOutOfDate);
        }

        let pending_polls = if previous.is_some() { self.resize_latency } else { 0 };
        log::debug!(
            "[HEADLESS] Swap chain {}x{} with {buffers} buffers for surface {}",
            extent.width,
            extent.height,
            surface.id
        );
        Ok(HeadlessSwapChain::new(
            &self.counters,
            surface.id,
            extent,
            buffers,
            pending_polls,
            self.surface_epoch.load(Ordering::Acquire),
        ))
    }

    fn poll_swap_chain(&self, chain: &mut HeadlessSwapChain) -> bool {
        if chain.pending_polls == 0 {
            return true;
        }
        chain.pending_polls -= 1;
        false
    }

    fn swap_chain_buffer_count(&self, chain: &HeadlessSwapChain) -> u32 {
        chain.buffer_count
    }

    fn swap_chain_extent(&self, chain: &HeadlessSwapChain) -> Extent2D {
        chain.extent
    }

    fn acquire_next_buffer(&self, chain: &mut HeadlessSwapChain, hint: u32) -> GfxResult<u32> {
        self.check_surface(chain)?;
        let index = hint % chain.buffer_count;
        chain.acquired = Some(index);
        Ok(index)
    }

    fn present(&self, chain: &mut HeadlessSwapChain, index: u32) -> GfxResult<()> {
        let mut queue = lock(&self.queue);
        self.check_surface(chain)?;
        if chain.acquired != Some(index) {
            return Err(GfxError::Backend(format!(
                "buffer {index} of surface {} presented without being acquired",
                chain.surface_id
            )));
        }
        chain.acquired = None;
        queue.presents += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graphics::BufferUse;

    fn buffer_desc(size: usize) -> BufferDesc {
        BufferDesc {
            usage: BufferUse::Vertex,
            size,
            dynamic: true,
        }
    }

    /// Objects are counted while alive and uncounted on drop
    #[test]
    fn test_live_counts_follow_drops() {
        let backend = HeadlessBackend::new(&GfxConfig::headless());
        let buffer = backend.create_buffer(&buffer_desc(16), None).unwrap();
        let texture = backend
            .create_texture(
                &TextureDesc {
                    kind: TextureKind::Dynamic,
                    format: crate::graphics::TextureFormat::I8,
                    extent: Extent2D::new(2, 2),
                },
                None,
            )
            .unwrap();

        assert_eq!(backend.live(ObjectKind::Buffer), 1);
        assert_eq!(backend.live_counts().resources(), 2);
        drop(buffer);
        drop(texture);
        assert_eq!(backend.live_counts(), LiveCounts::default());
    }

    /// The Nth allocation fails after N-1 successes
    #[test]
    fn test_allocation_failure_injection() {
        let backend = HeadlessBackend::new(&GfxConfig::headless());
        backend.fail_allocation_after(1);

        assert!(backend.create_buffer(&buffer_desc(4), None).is_ok());
        assert!(matches!(
            backend.create_buffer(&buffer_desc(4), None),
            Err(GfxError::OutOfMemory { requested: 4 })
        ));

        backend.clear_allocation_failure();
        assert!(backend.create_buffer(&buffer_desc(4), None).is_ok());
    }

    /// Buffer writes land in host memory
    #[test]
    fn test_write_buffer() {
        let backend = HeadlessBackend::new(&GfxConfig::headless());
        let buffer = backend.create_buffer(&buffer_desc(4), Some(&[1, 2, 3, 4])).unwrap();
        backend.write_buffer(&buffer, &[9, 9]).unwrap();
        assert_eq!(buffer.contents(), vec![9, 9, 3, 4]);
    }

    /// Manual completion only advances when told to
    #[test]
    fn test_manual_completion() {
        let config = GfxConfig::headless().with_completion(CompletionMode::Manual);
        let backend = HeadlessBackend::new(&config);

        assert_eq!(backend.submit(&[], None).unwrap(), 1);
        assert_eq!(backend.submit(&[], None).unwrap(), 2);
        assert_eq!(backend.completed_generation().unwrap(), 0);

        backend.complete_through(1);
        assert_eq!(backend.completed_generation().unwrap(), 1);

        // Completion never runs ahead of submission
        backend.complete_all();
        assert_eq!(backend.completed_generation().unwrap(), 2);
        assert_eq!(backend.stats().submissions, 2);
    }

    /// Replacement swap chains need the configured number of polls
    #[test]
    fn test_swap_chain_latency() {
        let backend = HeadlessBackend::new(&GfxConfig::headless().with_resize_latency(2));
        let mut surface = backend.create_surface();

        let mut first = backend
            .create_swap_chain(&mut surface, Extent2D::new(8, 8), 2, None)
            .unwrap();
        assert!(backend.poll_swap_chain(&mut first));

        let mut second = backend
            .create_swap_chain(&mut surface, Extent2D::new(16, 16), 2, Some(&first))
            .unwrap();
        assert!(!backend.poll_swap_chain(&mut second));
        assert!(!backend.poll_swap_chain(&mut second));
        assert!(backend.poll_swap_chain(&mut second));
        assert_eq!(backend.live_counts().swap_chain_images, 4);
    }

    /// Invalidated surfaces fail acquisition until the chain is rebuilt
    #[test]
    fn test_invalidate_surfaces() {
        let backend = HeadlessBackend::new(&GfxConfig::headless());
        let mut surface = backend.create_surface();
        let mut chain = backend
            .create_swap_chain(&mut surface, Extent2D::new(8, 8), 3, None)
            .unwrap();

        assert_eq!(backend.acquire_next_buffer(&mut chain, 4).unwrap(), 1);
        backend.invalidate_surfaces();
        assert!(backend.acquire_next_buffer(&mut chain, 0).unwrap_err().is_surface_out_of_date());

        let mut rebuilt = backend
            .create_swap_chain(&mut surface, Extent2D::new(8, 8), 3, Some(&chain))
            .unwrap();
        assert!(backend.acquire_next_buffer(&mut rebuilt, 0).is_ok());
    }
}
