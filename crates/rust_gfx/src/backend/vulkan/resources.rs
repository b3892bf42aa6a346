//! Buffers, images and textures backed by device memory

use std::sync::Arc;

use ash::vk;

use super::context::{DeviceContext, PhysicalDeviceInfo};
use super::{VulkanError, VulkanResult};
use crate::backend::{BufferDesc, TextureDesc, TextureKind};
use crate::graphics::{BufferUse, Extent2D, TextureFormat};

/// Format of every render texture's depth attachment and depth copy
pub const DEPTH_FORMAT: vk::Format = vk::Format::D32_SFLOAT;

/// Format of every render texture's color attachment
pub const COLOR_FORMAT: vk::Format = vk::Format::R8G8B8A8_UNORM;

/// Vulkan format for a texel format
pub fn texture_format(format: TextureFormat) -> vk::Format {
    match format {
        TextureFormat::Rgba8 => vk::Format::R8G8B8A8_UNORM,
        TextureFormat::I8 => vk::Format::R8_UNORM,
        TextureFormat::Dxt1 => vk::Format::BC1_RGBA_UNORM_BLOCK,
    }
}

/// Create the immutable sampler shared by every texture slot
pub fn create_sampler(device: &ash::Device, physical: &PhysicalDeviceInfo) -> VulkanResult<vk::Sampler> {
    let anisotropy = physical.features.sampler_anisotropy == vk::TRUE;
    let create_info = vk::SamplerCreateInfo::builder()
        .mag_filter(vk::Filter::LINEAR)
        .min_filter(vk::Filter::LINEAR)
        .address_mode_u(vk::SamplerAddressMode::REPEAT)
        .address_mode_v(vk::SamplerAddressMode::REPEAT)
        .address_mode_w(vk::SamplerAddressMode::REPEAT)
        .anisotropy_enable(anisotropy)
        .max_anisotropy(if anisotropy {
            physical.properties.limits.max_sampler_anisotropy.min(16.0)
        } else {
            1.0
        })
        .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
        .unnormalized_coordinates(false)
        .compare_enable(false)
        .compare_op(vk::CompareOp::ALWAYS)
        .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
        .min_lod(0.0)
        .max_lod(vk::LOD_CLAMP_NONE);

    unsafe { device.create_sampler(&create_info, None).map_err(VulkanError::Api) }
}

/// Host-visible buffer
pub struct VulkanBuffer {
    buffer: vk::Buffer,
    memory: vk::DeviceMemory,
    size: vk::DeviceSize,
    /// Requested size, before rounding up empty buffers
    len: usize,
    desc: Option<BufferDesc>,
    device: Arc<DeviceContext>,
}

impl VulkanBuffer {
    fn allocate(device: &Arc<DeviceContext>, len: usize, usage: vk::BufferUsageFlags) -> VulkanResult<Self> {
        // Zero-sized buffers are invalid in Vulkan
        let size = len.max(4) as vk::DeviceSize;
        let buffer_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe {
            device
                .device
                .create_buffer(&buffer_info, None)
                .map_err(VulkanError::Api)?
        };

        let requirements = unsafe { device.device.get_buffer_memory_requirements(buffer) };
        let memory = match device.allocate_memory(
            requirements,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        ) {
            Ok(memory) => memory,
            Err(err) => {
                unsafe { device.device.destroy_buffer(buffer, None) };
                return Err(err);
            }
        };

        let this = Self {
            buffer,
            memory,
            size,
            len,
            desc: None,
            device: Arc::clone(device),
        };
        unsafe {
            device
                .device
                .bind_buffer_memory(buffer, memory, 0)
                .map_err(VulkanError::Api)?;
        }
        Ok(this)
    }

    /// Create a pipeline buffer described by `desc`
    pub fn new(device: &Arc<DeviceContext>, desc: &BufferDesc) -> VulkanResult<Self> {
        let usage = match desc.usage {
            BufferUse::Vertex => vk::BufferUsageFlags::VERTEX_BUFFER,
            BufferUse::Index => vk::BufferUsageFlags::INDEX_BUFFER,
            BufferUse::Uniform => vk::BufferUsageFlags::UNIFORM_BUFFER,
        };
        let mut buffer = Self::allocate(device, desc.size, usage)?;
        buffer.desc = Some(*desc);
        Ok(buffer)
    }

    /// Create a transfer source holding `data`
    pub fn staging(device: &Arc<DeviceContext>, data: &[u8]) -> VulkanResult<Self> {
        let buffer = Self::allocate(device, data.len(), vk::BufferUsageFlags::TRANSFER_SRC)?;
        buffer.write(data)?;
        Ok(buffer)
    }

    /// Copy `data` to the start of the buffer
    pub fn write(&self, data: &[u8]) -> VulkanResult<()> {
        if data.len() > self.len {
            return Err(VulkanError::InvalidOperation {
                reason: format!("{} byte write into a {} byte buffer", data.len(), self.len),
            });
        }
        if data.is_empty() {
            return Ok(());
        }

        unsafe {
            let ptr = self
                .device
                .device
                .map_memory(self.memory, 0, self.size, vk::MemoryMapFlags::empty())
                .map_err(VulkanError::Api)?;
            std::ptr::copy_nonoverlapping(data.as_ptr(), ptr.cast::<u8>(), data.len());
            self.device.device.unmap_memory(self.memory);
        }
        Ok(())
    }

    /// Get the buffer handle
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    /// Usable size in bytes
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the buffer holds no bytes
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Whether the CPU may rewrite the buffer
    pub fn is_dynamic(&self) -> bool {
        self.desc.is_some_and(|desc| desc.dynamic)
    }
}

impl Drop for VulkanBuffer {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_buffer(self.buffer, None);
            self.device.device.free_memory(self.memory, None);
        }
    }
}

struct ImageSpec {
    format: vk::Format,
    extent: Extent2D,
    mips: u32,
    layers: u32,
    samples: vk::SampleCountFlags,
    usage: vk::ImageUsageFlags,
    aspect: vk::ImageAspectFlags,
}

/// Image, its memory and a view over every level and layer
pub struct VulkanImage {
    image: vk::Image,
    memory: vk::DeviceMemory,
    view: vk::ImageView,
    extent: Extent2D,
    mips: u32,
    layers: u32,
    aspect: vk::ImageAspectFlags,
    device: Arc<DeviceContext>,
}

impl VulkanImage {
    fn new(device: &Arc<DeviceContext>, spec: &ImageSpec) -> VulkanResult<Self> {
        let create_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .format(spec.format)
            .extent(vk::Extent3D {
                width: spec.extent.width.max(1),
                height: spec.extent.height.max(1),
                depth: 1,
            })
            .mip_levels(spec.mips)
            .array_layers(spec.layers)
            .samples(spec.samples)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(spec.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let image = unsafe {
            device
                .device
                .create_image(&create_info, None)
                .map_err(VulkanError::Api)?
        };
        let requirements = unsafe { device.device.get_image_memory_requirements(image) };
        let memory = match device.allocate_memory(requirements, vk::MemoryPropertyFlags::DEVICE_LOCAL) {
            Ok(memory) => memory,
            Err(err) => {
                unsafe { device.device.destroy_image(image, None) };
                return Err(err);
            }
        };

        let mut this = Self {
            image,
            memory,
            view: vk::ImageView::null(),
            extent: spec.extent,
            mips: spec.mips,
            layers: spec.layers,
            aspect: spec.aspect,
            device: Arc::clone(device),
        };
        unsafe {
            device
                .device
                .bind_image_memory(image, memory, 0)
                .map_err(VulkanError::Api)?;
        }

        let view_type = if spec.layers > 1 {
            vk::ImageViewType::TYPE_2D_ARRAY
        } else {
            vk::ImageViewType::TYPE_2D
        };
        let view_info = vk::ImageViewCreateInfo::builder()
            .image(image)
            .view_type(view_type)
            .format(spec.format)
            .subresource_range(this.full_range());
        this.view = unsafe {
            device
                .device
                .create_image_view(&view_info, None)
                .map_err(VulkanError::Api)?
        };

        Ok(this)
    }

    fn full_range(&self) -> vk::ImageSubresourceRange {
        vk::ImageSubresourceRange {
            aspect_mask: self.aspect,
            base_mip_level: 0,
            level_count: self.mips,
            base_array_layer: 0,
            layer_count: self.layers,
        }
    }

    /// Get the image handle
    pub fn handle(&self) -> vk::Image {
        self.image
    }

    /// View over every level and layer
    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    /// Aspect covered by the view
    pub fn aspect(&self) -> vk::ImageAspectFlags {
        self.aspect
    }

    /// Record a layout transition of the whole image
    pub fn transition(&self, cmd: vk::CommandBuffer, old: vk::ImageLayout, new: vk::ImageLayout) {
        record_transition(&self.device.device, cmd, self.image, self.full_range(), old, new);
    }

    /// Record a copy of level-major, layer-major texel data from `staging`
    fn record_copy_from(&self, cmd: vk::CommandBuffer, staging: vk::Buffer, format: TextureFormat) {
        let mut offset = 0;
        let mut regions = Vec::with_capacity((self.mips * self.layers) as usize);
        for layer in 0..self.layers {
            for level in 0..self.mips {
                let width = (self.extent.width >> level).max(1);
                let height = (self.extent.height >> level).max(1);
                regions.push(
                    vk::BufferImageCopy::builder()
                        .buffer_offset(offset as vk::DeviceSize)
                        .image_subresource(vk::ImageSubresourceLayers {
                            aspect_mask: self.aspect,
                            mip_level: level,
                            base_array_layer: layer,
                            layer_count: 1,
                        })
                        .image_extent(vk::Extent3D { width, height, depth: 1 })
                        .build(),
                );
                offset += format.level_size(width, height);
            }
        }

        unsafe {
            self.device.device.cmd_copy_buffer_to_image(
                cmd,
                staging,
                self.image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &regions,
            );
        }
    }
}

impl Drop for VulkanImage {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_image_view(self.view, None);
            self.device.device.destroy_image(self.image, None);
            self.device.device.free_memory(self.memory, None);
        }
    }
}

/// Access mask and stage an image layout is used with
fn layout_access(layout: vk::ImageLayout) -> (vk::AccessFlags, vk::PipelineStageFlags) {
    match layout {
        vk::ImageLayout::UNDEFINED => (vk::AccessFlags::empty(), vk::PipelineStageFlags::TOP_OF_PIPE),
        vk::ImageLayout::TRANSFER_DST_OPTIMAL => (vk::AccessFlags::TRANSFER_WRITE, vk::PipelineStageFlags::TRANSFER),
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL => (vk::AccessFlags::TRANSFER_READ, vk::PipelineStageFlags::TRANSFER),
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL => (
            vk::AccessFlags::SHADER_READ,
            vk::PipelineStageFlags::VERTEX_SHADER | vk::PipelineStageFlags::FRAGMENT_SHADER,
        ),
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL => (
            vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        ),
        vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL => (
            vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
        ),
        vk::ImageLayout::PRESENT_SRC_KHR => (vk::AccessFlags::empty(), vk::PipelineStageFlags::BOTTOM_OF_PIPE),
        _ => (
            vk::AccessFlags::MEMORY_READ | vk::AccessFlags::MEMORY_WRITE,
            vk::PipelineStageFlags::ALL_COMMANDS,
        ),
    }
}

/// Record an image layout transition with masks derived from both layouts
pub fn record_transition(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    image: vk::Image,
    range: vk::ImageSubresourceRange,
    old: vk::ImageLayout,
    new: vk::ImageLayout,
) {
    let (src_access, src_stage) = layout_access(old);
    let (dst_access, dst_stage) = layout_access(new);
    let barrier = vk::ImageMemoryBarrier::builder()
        .old_layout(old)
        .new_layout(new)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(range)
        .src_access_mask(src_access)
        .dst_access_mask(dst_access);

    unsafe {
        device.cmd_pipeline_barrier(
            cmd,
            src_stage,
            dst_stage,
            vk::DependencyFlags::empty(),
            &[],
            &[],
            &[barrier.build()],
        );
    }
}

/// Attachments and sampleable copies of a render texture
pub struct RenderTargets {
    /// Depth attachment
    pub depth: VulkanImage,
    /// Single-sample image the multisampled color attachment is resolved
    /// into before it is shown; `None` without multisampling
    pub resolve: Option<VulkanImage>,
    /// Framebuffer over the color and depth attachments
    pub framebuffer: vk::Framebuffer,
    /// Sampleable copy of the color attachment
    pub color_binding: Option<VulkanImage>,
    /// Sampleable copy of the depth attachment
    pub depth_binding: Option<VulkanImage>,
}

/// Texture of any kind
///
/// For render textures `image` is the color attachment; shaders sample the
/// binding copies instead.
pub struct VulkanTexture {
    desc: TextureDesc,
    image: VulkanImage,
    render: Option<RenderTargets>,
    device: Arc<DeviceContext>,
}

impl VulkanTexture {
    /// Create the images for `desc`; contents are uploaded separately
    pub fn new(device: &Arc<DeviceContext>, desc: &TextureDesc) -> VulkanResult<Self> {
        let sampled = vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST;

        let TextureKind::Render {
            color_binding,
            depth_binding,
            ..
        } = desc.kind
        else {
            let image = VulkanImage::new(
                device,
                &ImageSpec {
                    format: texture_format(desc.format),
                    extent: desc.extent,
                    mips: desc.mip_levels(),
                    layers: desc.layers(),
                    samples: vk::SampleCountFlags::TYPE_1,
                    usage: sampled,
                    aspect: vk::ImageAspectFlags::COLOR,
                },
            )?;
            return Ok(Self {
                desc: *desc,
                image,
                render: None,
                device: Arc::clone(device),
            });
        };

        // Attachments match the shared render pass; copies are single-sample
        let samples = device.samples;
        let multisampled = samples != vk::SampleCountFlags::TYPE_1;
        if multisampled && depth_binding {
            return Err(VulkanError::InvalidOperation {
                reason: "multisampled depth attachments cannot be resolved for sampling".to_string(),
            });
        }

        let color_spec = |samples, usage| ImageSpec {
            format: COLOR_FORMAT,
            extent: desc.extent,
            mips: 1,
            layers: 1,
            samples,
            usage,
            aspect: vk::ImageAspectFlags::COLOR,
        };
        let depth_spec = |samples, usage| ImageSpec {
            format: DEPTH_FORMAT,
            extent: desc.extent,
            mips: 1,
            layers: 1,
            samples,
            usage,
            aspect: vk::ImageAspectFlags::DEPTH,
        };
        let single = vk::SampleCountFlags::TYPE_1;

        let image = VulkanImage::new(
            device,
            &color_spec(
                samples,
                vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_SRC,
            ),
        )?;
        let depth = VulkanImage::new(
            device,
            &depth_spec(
                samples,
                vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_SRC,
            ),
        )?;
        let resolve = multisampled
            .then(|| {
                VulkanImage::new(
                    device,
                    &color_spec(
                        single,
                        vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::TRANSFER_SRC,
                    ),
                )
            })
            .transpose()?;
        let color_binding = color_binding
            .then(|| VulkanImage::new(device, &color_spec(single, sampled)))
            .transpose()?;
        let depth_binding = depth_binding
            .then(|| VulkanImage::new(device, &depth_spec(single, sampled)))
            .transpose()?;

        let attachments = [image.view(), depth.view()];
        let framebuffer_info = vk::FramebufferCreateInfo::builder()
            .render_pass(device.render_pass)
            .attachments(&attachments)
            .width(desc.extent.width.max(1))
            .height(desc.extent.height.max(1))
            .layers(1);
        let framebuffer = unsafe {
            device
                .device
                .create_framebuffer(&framebuffer_info, None)
                .map_err(VulkanError::Api)?
        };

        Ok(Self {
            desc: *desc,
            image,
            render: Some(RenderTargets {
                depth,
                resolve,
                framebuffer,
                color_binding,
                depth_binding,
            }),
            device: Arc::clone(device),
        })
    }

    /// Creation parameters
    pub fn desc(&self) -> &TextureDesc {
        &self.desc
    }

    /// Main image; the color attachment of a render texture
    pub fn image(&self) -> &VulkanImage {
        &self.image
    }

    /// Attachments of a render texture
    pub fn render_targets(&self) -> Option<&RenderTargets> {
        self.render.as_ref()
    }

    /// View bound to a texture slot
    pub fn sampled_view(&self) -> vk::ImageView {
        match &self.render {
            Some(targets) => targets
                .color_binding
                .as_ref()
                .or(targets.depth_binding.as_ref())
                .map_or(vk::ImageView::null(), VulkanImage::view),
            None => self.image.view(),
        }
    }

    /// Record the transitions into the layouts frames expect, uploading `staging` first
    pub fn record_initialize(&self, cmd: vk::CommandBuffer, staging: Option<&VulkanBuffer>) {
        let Some(targets) = &self.render else {
            self.record_upload(cmd, staging, vk::ImageLayout::UNDEFINED);
            return;
        };

        self.image.transition(
            cmd,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        );
        targets.depth.transition(
            cmd,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        );
        if let Some(resolve) = &targets.resolve {
            resolve.transition(cmd, vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_SRC_OPTIMAL);
        }
        for binding in targets.color_binding.iter().chain(&targets.depth_binding) {
            binding.transition(cmd, vk::ImageLayout::UNDEFINED, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        }
    }

    /// Record a texel upload from `staging`, leaving the image shader-readable
    pub fn record_upload(&self, cmd: vk::CommandBuffer, staging: Option<&VulkanBuffer>, old: vk::ImageLayout) {
        match staging {
            Some(staging) => {
                self.image.transition(cmd, old, vk::ImageLayout::TRANSFER_DST_OPTIMAL);
                self.image.record_copy_from(cmd, staging.handle(), self.desc.format);
                self.image.transition(
                    cmd,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                );
            }
            None => self.image.transition(cmd, old, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL),
        }
    }
}

impl Drop for VulkanTexture {
    fn drop(&mut self) {
        if let Some(targets) = &self.render {
            unsafe {
                self.device.device.destroy_framebuffer(targets.framebuffer, None);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Every texel format maps onto a sampleable Vulkan format
    #[test]
    fn test_texture_formats() {
        assert_eq!(texture_format(TextureFormat::Rgba8), vk::Format::R8G8B8A8_UNORM);
        assert_eq!(texture_format(TextureFormat::I8), vk::Format::R8_UNORM);
        assert_eq!(texture_format(TextureFormat::Dxt1), vk::Format::BC1_RGBA_UNORM_BLOCK);
    }

    /// Attachment layouts wait on attachment stages, presentation on nothing
    #[test]
    fn test_layout_access() {
        let (access, stage) = layout_access(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
        assert!(access.contains(vk::AccessFlags::COLOR_ATTACHMENT_WRITE));
        assert_eq!(stage, vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT);

        let (access, stage) = layout_access(vk::ImageLayout::PRESENT_SRC_KHR);
        assert!(access.is_empty());
        assert_eq!(stage, vk::PipelineStageFlags::BOTTOM_OF_PIPE);

        let (_, stage) = layout_access(vk::ImageLayout::UNDEFINED);
        assert_eq!(stage, vk::PipelineStageFlags::TOP_OF_PIPE);
    }
}
