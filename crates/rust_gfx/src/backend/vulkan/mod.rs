//! Vulkan backend
//!
//! Every object holds an `Arc` to the shared [`context::DeviceContext`] and
//! destroys its own handles in `Drop`. All pipelines share one render pass
//! layout and one descriptor set layout:
//!
//! - set 0, bindings `0..U`: uniform buffers
//! - bindings `U..U+T`: sampled images
//! - binding `U+T`: one immutable sampler
//!
//! Render textures own their color and depth attachments; presenting blits a
//! render texture into the acquired swap-chain image. Submissions are fenced
//! per command buffer and numbered with a generation counter.

pub mod binding;
pub mod commands;
pub mod context;
pub mod pipeline;
pub mod resources;
pub mod surface_source;
pub mod swapchain;
pub mod sync;

pub use binding::VulkanBinding;
pub use pipeline::{VulkanPipeline, VulkanVertexFormat};
pub use resources::{VulkanBuffer, VulkanTexture};
pub use surface_source::{RawWindowSource, SurfaceSource};
pub use swapchain::{VulkanSurface, VulkanSwapChain};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use ash::vk;
use thiserror::Error;

use binding::{DescriptorAllocator, DescriptorSetWriter, Stream};
use commands::{DisplayTarget, FrameRecorder, FrameRing};
use context::{DeviceContext, PhysicalDeviceInfo, VulkanInstance};

use crate::backend::{
    Backend, BindingDesc, BufferDesc, DeviceCommand, PipelineDesc, PresentTarget, TextureDesc, TextureKind,
};
use crate::config::GfxConfig;
use crate::error::{GfxError, GfxResult};
use crate::graphics::{Extent2D, Platform, VertexLayout};

/// Vulkan-specific error types
#[derive(Error, Debug)]
pub enum VulkanError {
    /// General Vulkan API error with result code
    #[error("Vulkan API error: {0:?}")]
    Api(vk::Result),

    /// Invalid operation attempted
    #[error("Invalid operation: {reason}")]
    InvalidOperation {
        /// Description of why the operation is invalid
        reason: String,
    },

    /// Memory allocation failed
    #[error("Out of memory: {requested} bytes")]
    OutOfMemory {
        /// Number of bytes that were requested
        requested: usize,
    },

    /// Vulkan context initialization failed
    #[error("Initialization failed: {0}")]
    InitializationFailed(String),

    /// No suitable memory type found for allocation
    #[error("No suitable memory type found")]
    NoSuitableMemoryType,
}

/// Result type for Vulkan operations
pub type VulkanResult<T> = Result<T, VulkanError>;

/// Vulkan device driving every facet of the backend interface
pub struct VulkanBackend {
    /// Queue lock: guards the queue, the command pool and the frame fences
    ring: Mutex<FrameRing>,
    descriptors: Arc<DescriptorAllocator>,
    submitted: AtomicU64,
    completed: AtomicU64,
    device: Arc<DeviceContext>,
}

impl VulkanBackend {
    /// Create the device for `window` and return the window's surface with it
    ///
    /// The physical device is chosen for its ability to present to this
    /// window. Further windows get surfaces through
    /// [`VulkanBackend::create_surface`].
    pub fn new(config: &GfxConfig, window: &dyn SurfaceSource) -> GfxResult<(Arc<Self>, VulkanSurface)> {
        config.validate()?;

        let extensions = window.required_extensions()?;
        let instance = VulkanInstance::new(
            &config.application_name,
            &extensions,
            config.vulkan.validation_enabled(),
        )?;

        let surface_loader = ash::extensions::khr::Surface::new(&instance.entry, &instance.instance);
        let surface = window.create_surface(&instance.entry, &instance.instance)?;
        let physical = match PhysicalDeviceInfo::select_suitable_device(&instance.instance, surface, &surface_loader) {
            Ok(physical) => physical,
            Err(err) => {
                unsafe { surface_loader.destroy_surface(surface, None) };
                return Err(err.into());
            }
        };

        let device = Arc::new(DeviceContext::new(
            instance,
            physical,
            config.binding_limits,
            config.draw_samples,
        )?);
        let surface = VulkanSurface::new(&device, surface);

        let ring = FrameRing::new(&device, config.frames_in_flight.max(1) + 1)?;
        let descriptors = Arc::new(DescriptorAllocator::new(
            &device,
            config.vulkan.descriptor_sets_per_pool,
            config.vulkan.max_descriptor_pools,
        ));

        log::info!(
            "[VULKAN] Backend ready on {} ({} uniform slots, {} texture slots, {}x samples)",
            device.physical.name(),
            config.binding_limits.uniform_slots,
            config.binding_limits.texture_slots,
            device.samples.as_raw()
        );

        let backend = Arc::new(Self {
            ring: Mutex::new(ring),
            descriptors,
            submitted: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            device,
        });
        Ok((backend, surface))
    }

    /// Create a surface for another window on the same device
    pub fn create_surface(&self, window: &dyn SurfaceSource) -> GfxResult<VulkanSurface> {
        let instance = &self.device.instance;
        let surface = window.create_surface(&instance.entry, &instance.instance)?;
        let surface = VulkanSurface::new(&self.device, surface);

        let supported = unsafe {
            self.device.surface_loader.get_physical_device_surface_support(
                self.device.physical.device,
                self.device.physical.queue_family,
                surface.handle(),
            )
        }?;
        if !supported {
            return Err(GfxError::Backend(
                "the selected queue family cannot present to this window".to_string(),
            ));
        }
        Ok(surface)
    }

    /// Name of the selected physical device
    pub fn device_name(&self) -> String {
        self.device.physical.name()
    }

    fn ring(&self) -> MutexGuard<'_, FrameRing> {
        self.ring.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn upload_texture(&self, texture: &VulkanTexture, data: &[u8], old: vk::ImageLayout) -> GfxResult<()> {
        let staging = VulkanBuffer::staging(&self.device, data)?;
        self.ring()
            .one_shot(|cmd| texture.record_upload(cmd, Some(&staging), old))?;
        Ok(())
    }
}

impl Drop for VulkanBackend {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device.device_wait_idle();
        }
        log::info!(
            "[VULKAN] Backend shut down after {} submissions",
            self.submitted.load(Ordering::Acquire)
        );
    }
}

fn element_count(size: usize, stride: u32) -> u32 {
    if stride == 0 {
        0
    } else {
        u32::try_from(size / stride as usize).unwrap_or(u32::MAX)
    }
}

impl Backend for VulkanBackend {
    type Buffer = VulkanBuffer;
    type Texture = VulkanTexture;
    type VertexFormat = VulkanVertexFormat;
    type Pipeline = VulkanPipeline;
    type Binding = VulkanBinding;
    type Surface = VulkanSurface;
    type SwapChain = VulkanSwapChain;

    fn platform(&self) -> Platform {
        Platform::Vulkan
    }

    fn binding_needs_vertex_format(&self) -> bool {
        // Vertex input state is baked into the pipeline
        false
    }

    fn draw_samples(&self) -> u32 {
        self.device.samples.as_raw()
    }

    fn create_buffer(&self, desc: &BufferDesc, contents: Option<&[u8]>) -> GfxResult<VulkanBuffer> {
        let buffer = VulkanBuffer::new(&self.device, desc)?;
        if let Some(data) = contents {
            buffer.write(data)?;
        }
        Ok(buffer)
    }

    fn write_buffer(&self, buffer: &VulkanBuffer, data: &[u8]) -> GfxResult<()> {
        if !buffer.is_dynamic() {
            return Err(GfxError::Backend("write to a static buffer".to_string()));
        }
        buffer.write(data)?;
        Ok(())
    }

    fn create_texture(&self, desc: &TextureDesc, contents: Option<&[u8]>) -> GfxResult<VulkanTexture> {
        let texture = VulkanTexture::new(&self.device, desc)?;
        let staging = contents
            .map(|data| VulkanBuffer::staging(&self.device, data))
            .transpose()?;
        self.ring()
            .one_shot(|cmd| texture.record_initialize(cmd, staging.as_ref()))?;
        Ok(texture)
    }

    fn write_texture(&self, texture: &VulkanTexture, data: &[u8]) -> GfxResult<()> {
        if texture.desc().kind != TextureKind::Dynamic {
            return Err(GfxError::Backend("write to a texture that is not dynamic".to_string()));
        }
        self.upload_texture(texture, data, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
    }

    fn create_vertex_format(&self, layout: &VertexLayout) -> GfxResult<VulkanVertexFormat> {
        Ok(VulkanVertexFormat::new(layout))
    }

    fn create_pipeline(&self, desc: &PipelineDesc<'_, Self>) -> GfxResult<(VulkanPipeline, Vec<u8>)> {
        if !desc.cache.is_empty() {
            pipeline::validate_cache_header(desc.cache, &self.device.physical.properties)
                .map_err(|reason| GfxError::InvalidShaderBlob { reason })?;
        }
        if desc.vertex_format.layout() != desc.layout {
            return Err(GfxError::Backend("vertex format does not match its layout".to_string()));
        }

        let (pipeline, cache) = VulkanPipeline::new(
            &self.device,
            desc.vertex,
            desc.fragment,
            desc.cache,
            desc.vertex_format,
            desc.state,
        )?;
        Ok((pipeline, cache))
    }

    fn create_binding(&self, desc: &BindingDesc<'_, Self>) -> GfxResult<VulkanBinding> {
        let limits = self.device.limits;
        let (set, pool_index) = self.descriptors.allocate()?;
        let mut binding = VulkanBinding::new(&self.descriptors, set, pool_index, desc.pipeline.handle());

        let mut writer = DescriptorSetWriter::new(set);
        for (slot, uniform) in desc.uniforms.iter().enumerate() {
            let range = uniform.range.end.saturating_sub(uniform.range.start);
            writer = writer.uniform(
                slot as u32,
                uniform.buffer.handle(),
                uniform.range.start as u64,
                range.max(1) as u64,
            );
        }
        for (slot, texture) in desc.textures.iter().enumerate() {
            writer = writer.sampled_image(limits.uniform_slots + slot as u32, texture.sampled_view());
        }
        writer.update(&self.device.device);

        binding.needs_vertices = desc.layout.vertex_stride > 0;
        binding.needs_instances = desc.layout.has_instance_stream();
        binding.vertices = desc.vertex_buffer.map(|(buffer, size)| Stream {
            buffer: buffer.handle(),
            capacity: element_count(size, desc.layout.vertex_stride),
        });
        binding.instances = desc.instance_buffer.map(|(buffer, size)| Stream {
            buffer: buffer.handle(),
            capacity: element_count(size, desc.layout.instance_stride),
        });
        binding.indices = desc.index_buffer.map(|(buffer, size)| Stream {
            buffer: buffer.handle(),
            capacity: element_count(size, 4),
        });

        Ok(binding)
    }

    fn submit(&self, commands: &[DeviceCommand<'_, Self>], target: Option<PresentTarget<'_, Self>>) -> GfxResult<u64> {
        let mut ring = self.ring();

        let (display, semaphores) = match &target {
            Some(target) => {
                let (image, wait, signal) = target.chain.frame_target(target.index)?;
                let display = DisplayTarget {
                    image,
                    extent: target.chain.extent(),
                };
                (Some(display), Some((wait, signal)))
            }
            None => (None, None),
        };

        let (slot, cmd) = ring.begin_frame()?;
        FrameRecorder::new(&self.device, cmd, display).record(commands)?;

        let generation = self.submitted.load(Ordering::Acquire) + 1;
        ring.submit_frame(
            slot,
            generation,
            semaphores.map(|(wait, _)| wait),
            semaphores.map(|(_, signal)| signal),
        )?;
        self.submitted.store(generation, Ordering::Release);

        log::trace!("[VULKAN] Submitted generation {generation} ({} commands)", commands.len());
        Ok(generation)
    }

    fn submitted_generation(&self) -> u64 {
        self.submitted.load(Ordering::Acquire)
    }

    fn completed_generation(&self) -> GfxResult<u64> {
        let ring = self.ring();
        let done = ring.completed(self.completed.load(Ordering::Acquire))?;
        Ok(self.completed.fetch_max(done, Ordering::AcqRel).max(done))
    }

    fn wait_for_generation(&self, generation: u64) -> GfxResult<()> {
        let ring = self.ring();
        let generation = generation.min(self.submitted.load(Ordering::Acquire));
        let completed = self.completed.load(Ordering::Acquire);
        if generation <= completed {
            return Ok(());
        }

        ring.wait_for(completed, generation)?;
        self.completed.fetch_max(generation, Ordering::AcqRel);
        Ok(())
    }

    fn create_swap_chain(
        &self,
        surface: &mut VulkanSurface,
        extent: Extent2D,
        buffers: u32,
        previous: Option<&VulkanSwapChain>,
    ) -> GfxResult<VulkanSwapChain> {
        if extent.is_empty() {
            return Err(GfxError::SurfaceOutOfDate);
        }
        Ok(VulkanSwapChain::new(&self.device, surface, extent, buffers, previous)?)
    }

    fn poll_swap_chain(&self, _chain: &mut VulkanSwapChain) -> bool {
        // Swap chains are built synchronously
        true
    }

    fn swap_chain_buffer_count(&self, chain: &VulkanSwapChain) -> u32 {
        chain.image_count()
    }

    fn swap_chain_extent(&self, chain: &VulkanSwapChain) -> Extent2D {
        chain.extent()
    }

    fn acquire_next_buffer(&self, chain: &mut VulkanSwapChain, hint: u32) -> GfxResult<u32> {
        let index = chain.acquire()?;
        if index != hint {
            log::trace!("[SWAPCHAIN] Driver returned image {index}, expected {hint}");
        }
        Ok(index)
    }

    fn present(&self, chain: &mut VulkanSwapChain, index: u32) -> GfxResult<()> {
        let _queue = self.ring();
        chain.present(self.device.queue, index)?;
        Ok(())
    }
}
