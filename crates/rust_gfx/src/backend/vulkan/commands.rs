//! Frame command buffers, generation fences and command translation

use std::sync::Arc;

use ash::vk;

use super::binding::VulkanBinding;
use super::context::DeviceContext;
use super::resources::{record_transition, VulkanImage, VulkanTexture};
use super::sync::Fence;
use super::{VulkanBackend, VulkanError, VulkanResult};
use crate::backend::DeviceCommand;
use crate::graphics::{Extent2D, Rect2D};

struct FrameSlot {
    cmd: vk::CommandBuffer,
    fence: Fence,
    /// Generation last submitted from this slot, zero when never used
    generation: u64,
}

/// Ring of command buffers, each fenced with the generation it carried
///
/// Access is serialized by the backend's queue lock, which also guards the
/// command pool and the queue itself.
pub struct FrameRing {
    pool: vk::CommandPool,
    slots: Vec<FrameSlot>,
    next: usize,
    upload: vk::CommandBuffer,
    upload_fence: Fence,
    device: Arc<DeviceContext>,
}

impl FrameRing {
    /// Create `frames` command buffers plus one for uploads
    pub fn new(device: &Arc<DeviceContext>, frames: usize) -> VulkanResult<Self> {
        let pool_info = vk::CommandPoolCreateInfo::builder()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(device.physical.queue_family);
        let pool = unsafe {
            device
                .device
                .create_command_pool(&pool_info, None)
                .map_err(VulkanError::Api)?
        };

        let mut ring = Self {
            pool,
            slots: Vec::with_capacity(frames),
            next: 0,
            upload: vk::CommandBuffer::null(),
            upload_fence: Fence::new(device, false)?,
            device: Arc::clone(device),
        };

        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(frames as u32 + 1);
        let mut buffers = unsafe {
            device
                .device
                .allocate_command_buffers(&alloc_info)
                .map_err(VulkanError::Api)?
        };
        ring.upload = buffers.pop().unwrap_or_default();
        for cmd in buffers {
            ring.slots.push(FrameSlot {
                cmd,
                fence: Fence::new(device, true)?,
                generation: 0,
            });
        }

        Ok(ring)
    }

    /// Wait for the next slot to be free and begin recording into it
    pub fn begin_frame(&mut self) -> VulkanResult<(usize, vk::CommandBuffer)> {
        let index = self.next;
        let slot = &self.slots[index];
        slot.fence.wait()?;

        let begin_info = vk::CommandBufferBeginInfo::builder().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe {
            let device = &self.device.device;
            device
                .reset_command_buffer(slot.cmd, vk::CommandBufferResetFlags::empty())
                .map_err(VulkanError::Api)?;
            device
                .begin_command_buffer(slot.cmd, &begin_info)
                .map_err(VulkanError::Api)?;
        }
        Ok((index, slot.cmd))
    }

    /// End and submit the slot returned by [`FrameRing::begin_frame`]
    pub fn submit_frame(
        &mut self,
        index: usize,
        generation: u64,
        wait: Option<vk::Semaphore>,
        signal: Option<vk::Semaphore>,
    ) -> VulkanResult<()> {
        let slot = &mut self.slots[index];
        let device = &self.device.device;

        let wait_semaphores: Vec<vk::Semaphore> = wait.into_iter().collect();
        let wait_stages = vec![vk::PipelineStageFlags::ALL_COMMANDS; wait_semaphores.len()];
        let signal_semaphores: Vec<vk::Semaphore> = signal.into_iter().collect();
        let command_buffers = [slot.cmd];
        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            device.end_command_buffer(slot.cmd).map_err(VulkanError::Api)?;
        }
        // A frame that failed to record leaves its fence signaled
        slot.fence.reset()?;
        unsafe {
            device
                .queue_submit(self.device.queue, &[submit_info.build()], slot.fence.handle())
                .map_err(VulkanError::Api)?;
        }

        slot.generation = generation;
        self.next = (self.next + 1) % self.slots.len();
        Ok(())
    }

    /// Highest generation `g >= completed` such that every slot up to `g` has signaled
    pub fn completed(&self, completed: u64) -> VulkanResult<u64> {
        let mut pending: Vec<&FrameSlot> = self.slots.iter().filter(|slot| slot.generation > completed).collect();
        pending.sort_unstable_by_key(|slot| slot.generation);

        let mut done = completed;
        for slot in pending {
            if !slot.fence.is_signaled()? {
                break;
            }
            done = slot.generation;
        }
        Ok(done)
    }

    /// Block until every slot carrying a generation up to `generation` has signaled
    pub fn wait_for(&self, completed: u64, generation: u64) -> VulkanResult<()> {
        for slot in &self.slots {
            if slot.generation > completed && slot.generation <= generation {
                slot.fence.wait()?;
            }
        }
        Ok(())
    }

    /// Record, submit and wait for a transfer outside the frame ring
    pub fn one_shot(&mut self, record: impl FnOnce(vk::CommandBuffer)) -> VulkanResult<()> {
        let device = &self.device.device;
        let begin_info = vk::CommandBufferBeginInfo::builder().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);

        unsafe {
            device
                .reset_command_buffer(self.upload, vk::CommandBufferResetFlags::empty())
                .map_err(VulkanError::Api)?;
            device
                .begin_command_buffer(self.upload, &begin_info)
                .map_err(VulkanError::Api)?;
        }
        record(self.upload);

        let command_buffers = [self.upload];
        let submit_info = vk::SubmitInfo::builder().command_buffers(&command_buffers);
        unsafe {
            device.end_command_buffer(self.upload).map_err(VulkanError::Api)?;
            device
                .queue_submit(self.device.queue, &[submit_info.build()], self.upload_fence.handle())
                .map_err(VulkanError::Api)?;
        }
        self.upload_fence.wait()?;
        self.upload_fence.reset()
    }
}

impl Drop for FrameRing {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device.queue_wait_idle(self.device.queue);
            self.device.device.destroy_command_pool(self.pool, None);
        }
    }
}

/// Swap-chain image a frame resolves into
#[derive(Debug, Clone, Copy)]
pub struct DisplayTarget {
    /// Acquired image
    pub image: vk::Image,
    /// Image size
    pub extent: Extent2D,
}

fn invalid(reason: impl Into<String>) -> VulkanError {
    VulkanError::InvalidOperation { reason: reason.into() }
}

fn color_range() -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        base_mip_level: 0,
        level_count: 1,
        base_array_layer: 0,
        layer_count: 1,
    }
}

fn to_viewport(rect: Rect2D) -> vk::Viewport {
    vk::Viewport {
        x: rect.x as f32,
        y: rect.y as f32,
        width: rect.width as f32,
        height: rect.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    }
}

fn to_rect(rect: Rect2D) -> vk::Rect2D {
    vk::Rect2D {
        offset: vk::Offset2D { x: rect.x, y: rect.y },
        extent: vk::Extent2D {
            width: rect.width,
            height: rect.height,
        },
    }
}

/// Clip `rect` to `extent` and convert a bottom-left origin to top-left
pub fn resolve_region(rect: Rect2D, extent: Extent2D, top_left_origin: bool) -> Option<Rect2D> {
    let x0 = rect.x.clamp(0, extent.width as i32);
    let x1 = (i64::from(rect.x) + i64::from(rect.width)).clamp(0, i64::from(extent.width)) as i32;
    let (y0, y1) = if top_left_origin {
        (
            rect.y.clamp(0, extent.height as i32),
            (i64::from(rect.y) + i64::from(rect.height)).clamp(0, i64::from(extent.height)) as i32,
        )
    } else {
        let top = i64::from(extent.height) - i64::from(rect.y) - i64::from(rect.height);
        let bottom = i64::from(extent.height) - i64::from(rect.y);
        (
            top.clamp(0, i64::from(extent.height)) as i32,
            bottom.clamp(0, i64::from(extent.height)) as i32,
        )
    };

    (x1 > x0 && y1 > y0).then(|| Rect2D::new(x0, y0, (x1 - x0) as u32, (y1 - y0) as u32))
}

/// Translates device commands into one command buffer
pub struct FrameRecorder<'a> {
    device: &'a DeviceContext,
    cmd: vk::CommandBuffer,
    target: Option<&'a VulkanTexture>,
    in_pass: bool,
    viewport: Rect2D,
    scissor: Rect2D,
    clear_color: [f32; 4],
    binding: Option<&'a VulkanBinding>,
    display: Option<DisplayTarget>,
    displayed: bool,
}

impl<'a> FrameRecorder<'a> {
    /// Start translating into `cmd`, which must be recording
    pub fn new(device: &'a DeviceContext, cmd: vk::CommandBuffer, display: Option<DisplayTarget>) -> Self {
        Self {
            device,
            cmd,
            target: None,
            in_pass: false,
            viewport: Rect2D::default(),
            scissor: Rect2D::default(),
            clear_color: [0.0, 0.0, 0.0, 1.0],
            binding: None,
            display,
            displayed: false,
        }
    }

    /// Translate every command, then leave the display image ready to present
    pub fn record(mut self, commands: &'a [DeviceCommand<'a, VulkanBackend>]) -> VulkanResult<()> {
        for command in commands {
            self.record_one(command)?;
        }
        self.finish();
        Ok(())
    }

    fn record_one(&mut self, command: &DeviceCommand<'a, VulkanBackend>) -> VulkanResult<()> {
        let context: &'a DeviceContext = self.device;
        let device = &context.device;
        match *command {
            DeviceCommand::SetShaderDataBinding(binding) => {
                self.binding = Some(binding);
                unsafe {
                    device.cmd_bind_pipeline(self.cmd, vk::PipelineBindPoint::GRAPHICS, binding.pipeline);
                    device.cmd_bind_descriptor_sets(
                        self.cmd,
                        vk::PipelineBindPoint::GRAPHICS,
                        self.device.pipeline_layout,
                        0,
                        &[binding.set],
                        &[],
                    );
                    if let Some(stream) = binding.vertices {
                        device.cmd_bind_vertex_buffers(self.cmd, 0, &[stream.buffer], &[0]);
                    }
                    if let Some(stream) = binding.instances {
                        device.cmd_bind_vertex_buffers(self.cmd, 1, &[stream.buffer], &[0]);
                    }
                    if let Some(stream) = binding.indices {
                        device.cmd_bind_index_buffer(self.cmd, stream.buffer, 0, vk::IndexType::UINT32);
                    }
                }
            }
            DeviceCommand::SetRenderTarget(texture) => {
                if texture.render_targets().is_none() {
                    return Err(invalid("render target is not a render texture"));
                }
                self.end_pass();
                let full = Rect2D::from_extent(texture.desc().extent);
                self.target = Some(texture);
                self.viewport = full;
                self.scissor = full;
            }
            DeviceCommand::SetViewport(rect) => {
                self.viewport = rect;
                if self.in_pass {
                    unsafe { device.cmd_set_viewport(self.cmd, 0, &[to_viewport(rect)]) };
                }
            }
            DeviceCommand::SetScissor(rect) => {
                self.scissor = rect;
                if self.in_pass {
                    unsafe { device.cmd_set_scissor(self.cmd, 0, &[to_rect(rect)]) };
                }
            }
            DeviceCommand::SetClearColor(color) => self.clear_color = color,
            DeviceCommand::ClearTarget { color, depth } => {
                let extent = self.begin_pass("clear")?;
                let mut attachments = Vec::with_capacity(2);
                if color {
                    attachments.push(vk::ClearAttachment {
                        aspect_mask: vk::ImageAspectFlags::COLOR,
                        color_attachment: 0,
                        clear_value: vk::ClearValue {
                            color: vk::ClearColorValue {
                                float32: self.clear_color,
                            },
                        },
                    });
                }
                if depth {
                    attachments.push(vk::ClearAttachment {
                        aspect_mask: vk::ImageAspectFlags::DEPTH,
                        color_attachment: 0,
                        clear_value: vk::ClearValue {
                            depth_stencil: vk::ClearDepthStencilValue { depth: 1.0, stencil: 0 },
                        },
                    });
                }
                if !attachments.is_empty() {
                    let rect = vk::ClearRect {
                        rect: to_rect(Rect2D::from_extent(extent)),
                        base_array_layer: 0,
                        layer_count: 1,
                    };
                    unsafe { device.cmd_clear_attachments(self.cmd, &attachments, &[rect]) };
                }
            }
            DeviceCommand::Draw { start, count } => {
                self.draw_binding(start, count)?;
                unsafe { device.cmd_draw(self.cmd, count, 1, start, 0) };
            }
            DeviceCommand::DrawIndexed { start, count } => {
                let binding = self.binding.ok_or_else(|| invalid("draw without a data binding"))?;
                let indices = binding.indices.ok_or_else(|| invalid("indexed draw without an index buffer"))?;
                if u64::from(start) + u64::from(count) > u64::from(indices.capacity) {
                    return Err(invalid(format!(
                        "indices {start}..{} exceed the {} in the index buffer",
                        u64::from(start) + u64::from(count),
                        indices.capacity
                    )));
                }
                self.begin_pass("draw")?;
                unsafe { device.cmd_draw_indexed(self.cmd, count, 1, start, 0, 0) };
            }
            DeviceCommand::DrawInstances {
                start,
                count,
                instances,
            } => {
                let binding = self.draw_binding(start, count)?;
                match binding.instances {
                    Some(stream) if instances > stream.capacity => {
                        return Err(invalid(format!(
                            "{instances} instances exceed the {} in the instance buffer",
                            stream.capacity
                        )));
                    }
                    None if binding.needs_instances => return Err(invalid("binding has no instance buffer")),
                    _ => {}
                }
                unsafe { device.cmd_draw(self.cmd, count, instances, start, 0) };
            }
            DeviceCommand::ResolveBindTexture {
                texture,
                rect,
                top_left_origin,
                color,
                depth,
            } => {
                self.end_pass();
                self.resolve_bind(texture, rect, top_left_origin, color, depth)?;
            }
            DeviceCommand::ResolveDisplay(texture) => {
                self.end_pass();
                self.resolve_display(texture)?;
            }
        }
        Ok(())
    }

    /// Validate a non-indexed draw and make sure a render pass is open
    fn draw_binding(&mut self, start: u32, count: u32) -> VulkanResult<&'a VulkanBinding> {
        let binding = self.binding.ok_or_else(|| invalid("draw without a data binding"))?;
        match binding.vertices {
            Some(stream) if u64::from(start) + u64::from(count) > u64::from(stream.capacity) => {
                return Err(invalid(format!(
                    "vertices {start}..{} exceed the {} in the vertex buffer",
                    u64::from(start) + u64::from(count),
                    stream.capacity
                )));
            }
            None if binding.needs_vertices => return Err(invalid("binding has no vertex buffer")),
            _ => {}
        }
        self.begin_pass("draw")?;
        Ok(binding)
    }

    fn begin_pass(&mut self, what: &str) -> VulkanResult<Extent2D> {
        let target = self
            .target
            .ok_or_else(|| invalid(format!("{what} without a render target")))?;
        let extent = target.desc().extent;
        if self.in_pass {
            return Ok(extent);
        }
        let targets = target
            .render_targets()
            .ok_or_else(|| invalid("render target is not a render texture"))?;

        let begin_info = vk::RenderPassBeginInfo::builder()
            .render_pass(self.device.render_pass)
            .framebuffer(targets.framebuffer)
            .render_area(to_rect(Rect2D::from_extent(extent)));
        unsafe {
            let device = &self.device.device;
            device.cmd_begin_render_pass(self.cmd, &begin_info, vk::SubpassContents::INLINE);
            device.cmd_set_viewport(self.cmd, 0, &[to_viewport(self.viewport)]);
            device.cmd_set_scissor(self.cmd, 0, &[to_rect(self.scissor)]);
        }
        self.in_pass = true;
        Ok(extent)
    }

    fn end_pass(&mut self) {
        if self.in_pass {
            unsafe { self.device.device.cmd_end_render_pass(self.cmd) };
            self.in_pass = false;
        }
    }

    /// Copy `region` of `source` into `dest`, averaging samples when `source`
    /// is multisampled. Both images are returned to their resting layouts.
    fn copy_into(
        &self,
        source: &VulkanImage,
        source_layout: vk::ImageLayout,
        dest: &VulkanImage,
        dest_layout: vk::ImageLayout,
        region: Rect2D,
        multisampled: bool,
    ) {
        let subresource = vk::ImageSubresourceLayers {
            aspect_mask: dest.aspect(),
            mip_level: 0,
            base_array_layer: 0,
            layer_count: 1,
        };
        let offset = vk::Offset3D {
            x: region.x,
            y: region.y,
            z: 0,
        };
        let extent = vk::Extent3D {
            width: region.width,
            height: region.height,
            depth: 1,
        };

        source.transition(self.cmd, source_layout, vk::ImageLayout::TRANSFER_SRC_OPTIMAL);
        dest.transition(self.cmd, dest_layout, vk::ImageLayout::TRANSFER_DST_OPTIMAL);
        unsafe {
            let device = &self.device.device;
            if multisampled {
                let resolve = vk::ImageResolve {
                    src_subresource: subresource,
                    src_offset: offset,
                    dst_subresource: subresource,
                    dst_offset: offset,
                    extent,
                };
                device.cmd_resolve_image(
                    self.cmd,
                    source.handle(),
                    vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                    dest.handle(),
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &[resolve],
                );
            } else {
                let copy = vk::ImageCopy {
                    src_subresource: subresource,
                    src_offset: offset,
                    dst_subresource: subresource,
                    dst_offset: offset,
                    extent,
                };
                device.cmd_copy_image(
                    self.cmd,
                    source.handle(),
                    vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                    dest.handle(),
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &[copy],
                );
            }
        }
        dest.transition(self.cmd, vk::ImageLayout::TRANSFER_DST_OPTIMAL, dest_layout);
        source.transition(self.cmd, vk::ImageLayout::TRANSFER_SRC_OPTIMAL, source_layout);
    }

    fn resolve_bind(
        &mut self,
        texture: &VulkanTexture,
        rect: Rect2D,
        top_left_origin: bool,
        color: bool,
        depth: bool,
    ) -> VulkanResult<()> {
        let targets = texture
            .render_targets()
            .ok_or_else(|| invalid("resolve of a texture that is not a render texture"))?;
        let Some(region) = resolve_region(rect, texture.desc().extent, top_left_origin) else {
            return Ok(());
        };
        let multisampled = targets.resolve.is_some();

        if color {
            let binding = targets
                .color_binding
                .as_ref()
                .ok_or_else(|| invalid("color resolve without a color binding"))?;
            self.copy_into(
                texture.image(),
                vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                binding,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                region,
                multisampled,
            );
        }
        if depth {
            let binding = targets
                .depth_binding
                .as_ref()
                .ok_or_else(|| invalid("depth resolve without a depth binding"))?;
            if multisampled {
                return Err(invalid("depth resolve of a multisampled render texture"));
            }
            self.copy_into(
                &targets.depth,
                vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
                binding,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                region,
                false,
            );
        }
        Ok(())
    }

    fn resolve_display(&mut self, texture: &VulkanTexture) -> VulkanResult<()> {
        let display = self
            .display
            .ok_or_else(|| invalid("display resolve in a frame that does not present"))?;
        let targets = texture
            .render_targets()
            .ok_or_else(|| invalid("display resolve of a texture that is not a render texture"))?;

        let context: &'a DeviceContext = self.device;
        let device = &context.device;
        if !self.displayed {
            record_transition(
                device,
                self.cmd,
                display.image,
                color_range(),
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            );
        }

        // Blits cannot read multisampled images; go through the resolve image
        let extent = texture.desc().extent;
        let source = match &targets.resolve {
            Some(resolved) => {
                self.copy_into(
                    texture.image(),
                    vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                    resolved,
                    vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                    Rect2D::from_extent(extent),
                    true,
                );
                resolved
            }
            None => {
                texture.image().transition(
                    self.cmd,
                    vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                    vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                );
                texture.image()
            }
        };

        let layers = vk::ImageSubresourceLayers {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            mip_level: 0,
            base_array_layer: 0,
            layer_count: 1,
        };
        let corner = |extent: Extent2D| vk::Offset3D {
            x: extent.width as i32,
            y: extent.height as i32,
            z: 1,
        };
        let blit = vk::ImageBlit {
            src_subresource: layers,
            src_offsets: [vk::Offset3D::default(), corner(extent)],
            dst_subresource: layers,
            dst_offsets: [vk::Offset3D::default(), corner(display.extent)],
        };
        unsafe {
            device.cmd_blit_image(
                self.cmd,
                source.handle(),
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                display.image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[blit],
                vk::Filter::LINEAR,
            );
        }

        if targets.resolve.is_none() {
            texture.image().transition(
                self.cmd,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            );
        }
        self.displayed = true;
        Ok(())
    }

    fn finish(&mut self) {
        self.end_pass();
        let Some(display) = self.display else {
            return;
        };

        let context: &'a DeviceContext = self.device;
        let device = &context.device;
        if !self.displayed {
            // Nothing was resolved to the window this frame; present the clear color
            record_transition(
                device,
                self.cmd,
                display.image,
                color_range(),
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            );
            unsafe {
                device.cmd_clear_color_image(
                    self.cmd,
                    display.image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &vk::ClearColorValue {
                        float32: self.clear_color,
                    },
                    &[color_range()],
                );
            }
        }
        record_transition(
            device,
            self.cmd,
            display.image,
            color_range(),
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::PRESENT_SRC_KHR,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Regions are clipped to the texture
    #[test]
    fn test_resolve_region_clips() {
        let extent = Extent2D::new(64, 32);
        assert_eq!(
            resolve_region(Rect2D::new(-8, 4, 100, 100), extent, true),
            Some(Rect2D::new(0, 4, 64, 28))
        );
        assert_eq!(resolve_region(Rect2D::new(70, 0, 10, 10), extent, true), None);
    }

    /// Bottom-left regions are flipped into image rows
    #[test]
    fn test_resolve_region_flips_bottom_left() {
        let extent = Extent2D::new(64, 32);
        assert_eq!(
            resolve_region(Rect2D::new(0, 0, 16, 8), extent, false),
            Some(Rect2D::new(0, 24, 16, 8))
        );
        assert_eq!(
            resolve_region(Rect2D::new(0, 0, 16, 8), extent, true),
            Some(Rect2D::new(0, 0, 16, 8))
        );
    }
}
