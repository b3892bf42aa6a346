//! Vulkan synchronization primitives

use std::sync::Arc;

use ash::vk;

use super::context::DeviceContext;
use super::{VulkanError, VulkanResult};

/// Binary semaphore with RAII cleanup
pub struct Semaphore {
    semaphore: vk::Semaphore,
    device: Arc<DeviceContext>,
}

impl Semaphore {
    /// Create a new semaphore
    pub fn new(device: &Arc<DeviceContext>) -> VulkanResult<Self> {
        let create_info = vk::SemaphoreCreateInfo::builder();
        let semaphore = unsafe {
            device
                .device
                .create_semaphore(&create_info, None)
                .map_err(VulkanError::Api)?
        };

        Ok(Self {
            semaphore,
            device: Arc::clone(device),
        })
    }

    /// Get the semaphore handle
    pub fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_semaphore(self.semaphore, None);
        }
    }
}

/// Fence with RAII cleanup
pub struct Fence {
    fence: vk::Fence,
    device: Arc<DeviceContext>,
}

impl Fence {
    /// Create a new fence
    pub fn new(device: &Arc<DeviceContext>, signaled: bool) -> VulkanResult<Self> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let create_info = vk::FenceCreateInfo::builder().flags(flags);

        let fence = unsafe {
            device
                .device
                .create_fence(&create_info, None)
                .map_err(VulkanError::Api)?
        };

        Ok(Self {
            fence,
            device: Arc::clone(device),
        })
    }

    /// Block until signaled
    pub fn wait(&self) -> VulkanResult<()> {
        unsafe {
            self.device
                .device
                .wait_for_fences(&[self.fence], true, u64::MAX)
                .map_err(VulkanError::Api)
        }
    }

    /// Whether the fence is signaled, without blocking
    pub fn is_signaled(&self) -> VulkanResult<bool> {
        unsafe { self.device.device.get_fence_status(self.fence).map_err(VulkanError::Api) }
    }

    /// Return to the unsignaled state
    pub fn reset(&self) -> VulkanResult<()> {
        unsafe { self.device.device.reset_fences(&[self.fence]).map_err(VulkanError::Api) }
    }

    /// Get the fence handle
    pub fn handle(&self) -> vk::Fence {
        self.fence
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_fence(self.fence, None);
        }
    }
}
