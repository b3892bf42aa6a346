//! Window surfaces and swap chains

use std::sync::Arc;

use ash::vk;

use super::context::DeviceContext;
use super::sync::Semaphore;
use super::{VulkanError, VulkanResult};
use crate::graphics::Extent2D;

/// Presentation surface of one window
pub struct VulkanSurface {
    surface: vk::SurfaceKHR,
    device: Arc<DeviceContext>,
}

impl VulkanSurface {
    pub(super) fn new(device: &Arc<DeviceContext>, surface: vk::SurfaceKHR) -> Self {
        Self {
            surface,
            device: Arc::clone(device),
        }
    }

    /// Get the surface handle
    pub fn handle(&self) -> vk::SurfaceKHR {
        self.surface
    }
}

impl Drop for VulkanSurface {
    fn drop(&mut self) {
        unsafe {
            self.device.surface_loader.destroy_surface(self.surface, None);
        }
    }
}

/// Swap chain and the semaphores ordering acquire, render and present
pub struct VulkanSwapChain {
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    format: vk::SurfaceFormatKHR,
    extent: Extent2D,
    /// Rotated per acquisition; one more than the image count
    acquire_semaphores: Vec<Semaphore>,
    next_semaphore: usize,
    /// Signaled by the frame rendering into each image
    render_finished: Vec<Semaphore>,
    acquired: Option<(u32, vk::Semaphore)>,
    device: Arc<DeviceContext>,
}

impl VulkanSwapChain {
    /// Build a swap chain for `surface`, retiring `old` when given
    pub fn new(
        device: &Arc<DeviceContext>,
        surface: &VulkanSurface,
        window_extent: Extent2D,
        buffers: u32,
        old: Option<&Self>,
    ) -> VulkanResult<Self> {
        let physical = device.physical.device;
        let loader = &device.surface_loader;

        let surface_caps = unsafe {
            loader
                .get_physical_device_surface_capabilities(physical, surface.handle())
                .map_err(VulkanError::Api)?
        };
        let surface_formats = unsafe {
            loader
                .get_physical_device_surface_formats(physical, surface.handle())
                .map_err(VulkanError::Api)?
        };
        let format = surface_formats
            .iter()
            .find(|sf| sf.format == vk::Format::B8G8R8A8_UNORM && sf.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR)
            .or_else(|| surface_formats.first())
            .copied()
            .ok_or_else(|| VulkanError::InitializationFailed("surface reports no formats".to_string()))?;

        let present_modes = unsafe {
            loader
                .get_physical_device_surface_present_modes(physical, surface.handle())
                .map_err(VulkanError::Api)?
        };
        let present_mode = present_modes
            .iter()
            .copied()
            .find(|&mode| mode == vk::PresentModeKHR::MAILBOX)
            .unwrap_or(vk::PresentModeKHR::FIFO);

        let extent = if surface_caps.current_extent.width == u32::MAX {
            vk::Extent2D {
                width: window_extent
                    .width
                    .clamp(surface_caps.min_image_extent.width, surface_caps.max_image_extent.width),
                height: window_extent
                    .height
                    .clamp(surface_caps.min_image_extent.height, surface_caps.max_image_extent.height),
            }
        } else {
            surface_caps.current_extent
        };
        if extent.width == 0 || extent.height == 0 {
            return Err(VulkanError::Api(vk::Result::ERROR_OUT_OF_DATE_KHR));
        }

        let mut image_count = buffers.max(surface_caps.min_image_count);
        if surface_caps.max_image_count > 0 {
            image_count = image_count.min(surface_caps.max_image_count);
        }

        if !surface_caps
            .supported_usage_flags
            .contains(vk::ImageUsageFlags::TRANSFER_DST)
        {
            return Err(VulkanError::InitializationFailed(
                "surface images cannot be transfer destinations".to_string(),
            ));
        }

        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(surface.handle())
            .min_image_count(image_count)
            .image_format(format.format)
            .image_color_space(format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(surface_caps.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old.map_or(vk::SwapchainKHR::null(), |old| old.swapchain));

        let swapchain = unsafe {
            device
                .swapchain_loader
                .create_swapchain(&create_info, None)
                .map_err(VulkanError::Api)?
        };

        let mut this = Self {
            swapchain,
            images: Vec::new(),
            format,
            extent: Extent2D::new(extent.width, extent.height),
            acquire_semaphores: Vec::new(),
            next_semaphore: 0,
            render_finished: Vec::new(),
            acquired: None,
            device: Arc::clone(device),
        };

        this.images = unsafe {
            device
                .swapchain_loader
                .get_swapchain_images(swapchain)
                .map_err(VulkanError::Api)?
        };
        for _ in 0..=this.images.len() {
            this.acquire_semaphores.push(Semaphore::new(device)?);
        }
        for _ in 0..this.images.len() {
            this.render_finished.push(Semaphore::new(device)?);
        }

        log::debug!(
            "[SWAPCHAIN] Created {}x{} {:?} swap chain with {} images ({present_mode:?})",
            extent.width,
            extent.height,
            format.format,
            this.images.len()
        );
        Ok(this)
    }

    /// Number of presentable images
    pub fn image_count(&self) -> u32 {
        self.images.len() as u32
    }

    /// Extent of the images
    pub fn extent(&self) -> Extent2D {
        self.extent
    }

    /// Surface format of the images
    pub fn format(&self) -> vk::SurfaceFormatKHR {
        self.format
    }

    /// Acquire the next image, signaling a fresh semaphore
    pub fn acquire(&mut self) -> VulkanResult<u32> {
        if let Some((index, _)) = self.acquired {
            return Ok(index);
        }

        let semaphore = self.acquire_semaphores[self.next_semaphore].handle();
        let (index, suboptimal) = unsafe {
            self.device
                .swapchain_loader
                .acquire_next_image(self.swapchain, u64::MAX, semaphore, vk::Fence::null())
                .map_err(VulkanError::Api)?
        };
        if suboptimal {
            log::debug!("[SWAPCHAIN] Acquired image {index} from a suboptimal swap chain");
        }

        self.next_semaphore = (self.next_semaphore + 1) % self.acquire_semaphores.len();
        self.acquired = Some((index, semaphore));
        Ok(index)
    }

    /// Image, wait semaphore and signal semaphore for rendering into acquired image `index`
    pub fn frame_target(&self, index: u32) -> VulkanResult<(vk::Image, vk::Semaphore, vk::Semaphore)> {
        match self.acquired {
            Some((acquired, wait)) if acquired == index => Ok((
                self.images[index as usize],
                wait,
                self.render_finished[index as usize].handle(),
            )),
            _ => Err(VulkanError::InvalidOperation {
                reason: format!("image {index} was not acquired before submission"),
            }),
        }
    }

    /// Queue presentation of acquired image `index`
    pub fn present(&mut self, queue: vk::Queue, index: u32) -> VulkanResult<()> {
        if !matches!(self.acquired, Some((acquired, _)) if acquired == index) {
            return Err(VulkanError::InvalidOperation {
                reason: format!("image {index} presented without being acquired"),
            });
        }
        self.acquired = None;

        let wait = [self.render_finished[index as usize].handle()];
        let swapchains = [self.swapchain];
        let indices = [index];
        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&wait)
            .swapchains(&swapchains)
            .image_indices(&indices);

        let suboptimal = unsafe {
            self.device
                .swapchain_loader
                .queue_present(queue, &present_info)
                .map_err(VulkanError::Api)?
        };
        if suboptimal {
            log::debug!("[SWAPCHAIN] Presented to a suboptimal swap chain");
        }
        Ok(())
    }
}

impl Drop for VulkanSwapChain {
    fn drop(&mut self) {
        unsafe {
            self.device.swapchain_loader.destroy_swapchain(self.swapchain, None);
        }
        log::debug!("[SWAPCHAIN] Destroyed {}x{} swap chain", self.extent.width, self.extent.height);
    }
}
