//! Vulkan instance, device selection and the shared device context

use std::ffi::{c_char, CStr, CString};

use ash::extensions::ext::DebugUtils;
use ash::extensions::khr::{Surface, Swapchain as SwapchainLoader};
use ash::{vk, Device, Entry, Instance};

use super::{VulkanError, VulkanResult};
use crate::config::BindingLimits;

const VALIDATION_LAYER: &CStr = unsafe { CStr::from_bytes_with_nul_unchecked(b"VK_LAYER_KHRONOS_validation\0") };

/// Vulkan instance wrapper with RAII cleanup
pub struct VulkanInstance {
    /// Vulkan entry point
    pub entry: Entry,
    /// Vulkan instance handle
    pub instance: Instance,
    debug: Option<(DebugUtils, vk::DebugUtilsMessengerEXT)>,
}

impl VulkanInstance {
    /// Create an instance with the window system's extensions enabled
    pub fn new(app_name: &str, window_extensions: &[CString], enable_validation: bool) -> VulkanResult<Self> {
        let entry = unsafe { Entry::load() }
            .map_err(|e| VulkanError::InitializationFailed(format!("Failed to load Vulkan: {e:?}")))?;

        let app_name_cstr = CString::new(app_name)
            .map_err(|_| VulkanError::InitializationFailed("application name contains a NUL byte".to_string()))?;
        let engine_name = CString::new("rust_gfx")
            .map_err(|_| VulkanError::InitializationFailed("engine name contains a NUL byte".to_string()))?;
        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name_cstr)
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(&engine_name)
            .engine_version(vk::make_api_version(0, 1, 0, 0))
            .api_version(vk::API_VERSION_1_0);

        let validation = enable_validation && Self::validation_available(&entry);
        if enable_validation && !validation {
            log::warn!("[VULKAN] Validation requested but {VALIDATION_LAYER:?} is not installed");
        }

        let mut extensions: Vec<*const c_char> = window_extensions.iter().map(|ext| ext.as_ptr()).collect();
        if validation {
            extensions.push(DebugUtils::name().as_ptr());
        }
        let layers: Vec<*const c_char> = if validation {
            vec![VALIDATION_LAYER.as_ptr()]
        } else {
            Vec::new()
        };

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layers);

        let instance = unsafe { entry.create_instance(&create_info, None).map_err(VulkanError::Api)? };

        let mut this = Self {
            entry,
            instance,
            debug: None,
        };
        if validation {
            let debug_utils = DebugUtils::new(&this.entry, &this.instance);
            let messenger = Self::setup_debug_messenger(&debug_utils)?;
            this.debug = Some((debug_utils, messenger));
            log::info!("[VULKAN] Validation layers enabled");
        }

        Ok(this)
    }

    fn validation_available(entry: &Entry) -> bool {
        entry
            .enumerate_instance_layer_properties()
            .map(|layers| {
                layers
                    .iter()
                    .any(|layer| unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) } == VALIDATION_LAYER)
            })
            .unwrap_or(false)
    }

    fn setup_debug_messenger(debug_utils: &DebugUtils) -> VulkanResult<vk::DebugUtilsMessengerEXT> {
        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        unsafe {
            debug_utils
                .create_debug_utils_messenger(&create_info, None)
                .map_err(VulkanError::Api)
        }
    }
}

impl Drop for VulkanInstance {
    fn drop(&mut self) {
        unsafe {
            if let Some((debug_utils, messenger)) = self.debug.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    let callback_data = *callback_data;
    let message = CStr::from_ptr(callback_data.p_message).to_string_lossy();

    if message_severity >= vk::DebugUtilsMessageSeverityFlagsEXT::ERROR {
        log::error!("[VULKAN] {message_type:?} - {message}");
    } else if message_severity >= vk::DebugUtilsMessageSeverityFlagsEXT::WARNING {
        log::warn!("[VULKAN] {message_type:?} - {message}");
    } else {
        log::debug!("[VULKAN] {message_type:?} - {message}");
    }

    vk::FALSE
}

/// Physical device selection and capabilities
pub struct PhysicalDeviceInfo {
    /// Vulkan physical device handle
    pub device: vk::PhysicalDevice,
    /// Device properties and limits
    pub properties: vk::PhysicalDeviceProperties,
    /// Supported device features
    pub features: vk::PhysicalDeviceFeatures,
    /// Memory heaps and types
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    /// Queue family used for graphics, transfer and presentation
    pub queue_family: u32,
}

impl PhysicalDeviceInfo {
    /// Pick the first device with one queue family that renders and presents to `surface`
    pub fn select_suitable_device(
        instance: &Instance,
        surface: vk::SurfaceKHR,
        surface_loader: &Surface,
    ) -> VulkanResult<Self> {
        let devices = unsafe { instance.enumerate_physical_devices().map_err(VulkanError::Api)? };

        for device in devices {
            match Self::evaluate_device(instance, device, surface, surface_loader) {
                Ok(info) => {
                    log::info!("[VULKAN] Selected GPU: {}", info.name());
                    return Ok(info);
                }
                Err(err) => log::debug!("[VULKAN] Skipping device: {err}"),
            }
        }

        Err(VulkanError::InitializationFailed("No suitable GPU found".to_string()))
    }

    fn evaluate_device(
        instance: &Instance,
        device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
        surface_loader: &Surface,
    ) -> VulkanResult<Self> {
        let properties = unsafe { instance.get_physical_device_properties(device) };
        let features = unsafe { instance.get_physical_device_features(device) };
        let memory_properties = unsafe { instance.get_physical_device_memory_properties(device) };
        let queue_families = unsafe { instance.get_physical_device_queue_family_properties(device) };

        let mut queue_family = None;
        for (index, family) in queue_families.iter().enumerate() {
            let index = index as u32;
            if !family.queue_flags.contains(vk::QueueFlags::GRAPHICS) {
                continue;
            }
            let present_support = unsafe {
                surface_loader
                    .get_physical_device_surface_support(device, index, surface)
                    .map_err(VulkanError::Api)?
            };
            if present_support {
                queue_family = Some(index);
                break;
            }
        }
        let queue_family = queue_family.ok_or_else(|| {
            VulkanError::InitializationFailed("No queue family renders and presents".to_string())
        })?;

        let extensions = unsafe {
            instance
                .enumerate_device_extension_properties(device)
                .map_err(VulkanError::Api)?
        };
        let has_swapchain = extensions
            .iter()
            .any(|available| unsafe { CStr::from_ptr(available.extension_name.as_ptr()) } == SwapchainLoader::name());
        if !has_swapchain {
            return Err(VulkanError::InitializationFailed(
                "Required device extensions not supported".to_string(),
            ));
        }

        Ok(Self {
            device,
            properties,
            features,
            memory_properties,
            queue_family,
        })
    }

    /// Sample counts usable for both color and depth framebuffer attachments
    pub fn framebuffer_sample_counts(&self) -> vk::SampleCountFlags {
        let limits = &self.properties.limits;
        limits.framebuffer_color_sample_counts & limits.framebuffer_depth_sample_counts
    }

    /// Driver-reported device name
    pub fn name(&self) -> String {
        unsafe { CStr::from_ptr(self.properties.device_name.as_ptr()) }
            .to_string_lossy()
            .into_owned()
    }
}

/// Highest supported sample count not above `requested`
pub fn pick_sample_count(requested: u32, supported: vk::SampleCountFlags) -> vk::SampleCountFlags {
    [64, 32, 16, 8, 4, 2]
        .into_iter()
        .map(vk::SampleCountFlags::from_raw)
        .find(|&count| count.as_raw() <= requested && supported.contains(count))
        .unwrap_or(vk::SampleCountFlags::TYPE_1)
}

/// Device-wide state shared by every Vulkan object
///
/// Objects hold an `Arc` to this context and destroy their handles through
/// it, so the logical device is only torn down after the last object.
pub struct DeviceContext {
    /// Logical device
    pub device: Device,
    /// The single graphics and present queue; submission goes through the backend's queue lock
    pub queue: vk::Queue,
    /// Selected physical device
    pub physical: PhysicalDeviceInfo,
    /// Surface extension loader
    pub surface_loader: Surface,
    /// Swapchain extension loader
    pub swapchain_loader: SwapchainLoader,
    /// Render pass every render texture and pipeline is built against
    pub render_pass: vk::RenderPass,
    /// Samples per texel of render texture attachments and pipelines
    pub samples: vk::SampleCountFlags,
    /// Immutable sampler of the fixed binding layout
    pub sampler: vk::Sampler,
    /// Descriptor set layout shared by every pipeline
    pub set_layout: vk::DescriptorSetLayout,
    /// Pipeline layout shared by every pipeline
    pub pipeline_layout: vk::PipelineLayout,
    /// Slots of the fixed binding layout
    pub limits: BindingLimits,
    /// Declared last so the instance outlives the device
    pub instance: VulkanInstance,
}

impl DeviceContext {
    /// Create the logical device and the layouts shared by every pipeline
    ///
    /// `draw_samples` is lowered to the highest count the device supports.
    pub fn new(
        instance: VulkanInstance,
        physical: PhysicalDeviceInfo,
        limits: BindingLimits,
        draw_samples: u32,
    ) -> VulkanResult<Self> {
        let priorities = [1.0];
        let queue_infos = [vk::DeviceQueueCreateInfo::builder()
            .queue_family_index(physical.queue_family)
            .queue_priorities(&priorities)
            .build()];

        let required_extensions = [SwapchainLoader::name().as_ptr()];
        let device_features = vk::PhysicalDeviceFeatures::builder()
            .sampler_anisotropy(physical.features.sampler_anisotropy == vk::TRUE)
            .build();

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&required_extensions)
            .enabled_features(&device_features);

        let device = unsafe {
            instance
                .instance
                .create_device(physical.device, &create_info, None)
                .map_err(VulkanError::Api)?
        };
        let queue = unsafe { device.get_device_queue(physical.queue_family, 0) };
        let surface_loader = Surface::new(&instance.entry, &instance.instance);
        let swapchain_loader = SwapchainLoader::new(&instance.instance, &device);
        let samples = pick_sample_count(draw_samples, physical.framebuffer_sample_counts());
        if samples.as_raw() != draw_samples {
            log::warn!(
                "[VULKAN] {draw_samples}x multisampling is not supported, drawing with {}x",
                samples.as_raw()
            );
        }

        // Null handles are skipped by Drop, so a failure below cleans up what was built
        let mut context = Self {
            device,
            queue,
            physical,
            surface_loader,
            swapchain_loader,
            render_pass: vk::RenderPass::null(),
            samples,
            sampler: vk::Sampler::null(),
            set_layout: vk::DescriptorSetLayout::null(),
            pipeline_layout: vk::PipelineLayout::null(),
            limits,
            instance,
        };

        context.render_pass = super::pipeline::create_render_pass(&context.device, samples)?;
        context.sampler = super::resources::create_sampler(&context.device, &context.physical)?;
        context.set_layout = super::binding::create_set_layout(&context.device, limits, context.sampler)?;

        let set_layouts = [context.set_layout];
        let layout_info = vk::PipelineLayoutCreateInfo::builder().set_layouts(&set_layouts);
        context.pipeline_layout = unsafe {
            context
                .device
                .create_pipeline_layout(&layout_info, None)
                .map_err(VulkanError::Api)?
        };

        Ok(context)
    }

    /// Find a memory type index matching `type_filter` with all of `properties`
    pub fn find_memory_type(&self, type_filter: u32, properties: vk::MemoryPropertyFlags) -> VulkanResult<u32> {
        let memory = &self.physical.memory_properties;
        (0..memory.memory_type_count)
            .find(|&i| {
                type_filter & (1 << i) != 0 && memory.memory_types[i as usize].property_flags.contains(properties)
            })
            .ok_or(VulkanError::NoSuitableMemoryType)
    }

    /// Allocate and bind memory for `requirements`
    pub fn allocate_memory(
        &self,
        requirements: vk::MemoryRequirements,
        properties: vk::MemoryPropertyFlags,
    ) -> VulkanResult<vk::DeviceMemory> {
        let memory_type_index = self.find_memory_type(requirements.memory_type_bits, properties)?;
        let alloc_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type_index);

        unsafe { self.device.allocate_memory(&alloc_info, None) }.map_err(|err| match err {
            vk::Result::ERROR_OUT_OF_DEVICE_MEMORY | vk::Result::ERROR_OUT_OF_HOST_MEMORY => {
                VulkanError::OutOfMemory {
                    requested: requirements.size as usize,
                }
            }
            other => VulkanError::Api(other),
        })
    }
}

impl Drop for DeviceContext {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
            self.device.destroy_pipeline_layout(self.pipeline_layout, None);
            self.device.destroy_descriptor_set_layout(self.set_layout, None);
            self.device.destroy_sampler(self.sampler, None);
            self.device.destroy_render_pass(self.render_pass, None);
            self.device.destroy_device(None);
        }
        log::debug!("[VULKAN] Device destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Unsupported sample counts fall back to the next lower supported one
    #[test]
    fn test_pick_sample_count() {
        let supported = vk::SampleCountFlags::TYPE_1 | vk::SampleCountFlags::TYPE_2 | vk::SampleCountFlags::TYPE_4;
        assert_eq!(pick_sample_count(4, supported), vk::SampleCountFlags::TYPE_4);
        assert_eq!(pick_sample_count(16, supported), vk::SampleCountFlags::TYPE_4);
        assert_eq!(pick_sample_count(2, supported), vk::SampleCountFlags::TYPE_2);
        assert_eq!(pick_sample_count(1, supported), vk::SampleCountFlags::TYPE_1);
        assert_eq!(pick_sample_count(8, vk::SampleCountFlags::TYPE_1), vk::SampleCountFlags::TYPE_1);
    }
}
