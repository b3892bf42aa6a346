//! Shader modules, vertex input state and graphics pipelines

use std::ffi::CStr;
use std::sync::Arc;

use ash::vk;

use super::context::DeviceContext;
use super::resources::{COLOR_FORMAT, DEPTH_FORMAT};
use super::{VulkanError, VulkanResult};
use crate::graphics::{AttributeFormat, BlendFactor, PipelineState, Primitive, VertexLayout};

const ENTRY_POINT: &CStr = unsafe { CStr::from_bytes_with_nul_unchecked(b"main\0") };

/// Size of the header every Vulkan pipeline cache blob starts with
const CACHE_HEADER_SIZE: usize = 16 + vk::UUID_SIZE;

/// Create the render pass every render texture and pipeline uses
///
/// Attachments are loaded and stored; clears are recorded explicitly so a
/// pass can be interrupted by a resolve and resumed. Multisampled passes are
/// resolved outside the pass, so both attachments carry `samples`.
pub fn create_render_pass(device: &ash::Device, samples: vk::SampleCountFlags) -> VulkanResult<vk::RenderPass> {
    let attachments = [
        vk::AttachmentDescription::builder()
            .format(COLOR_FORMAT)
            .samples(samples)
            .load_op(vk::AttachmentLoadOp::LOAD)
            .store_op(vk::AttachmentStoreOp::STORE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .final_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .build(),
        vk::AttachmentDescription::builder()
            .format(DEPTH_FORMAT)
            .samples(samples)
            .load_op(vk::AttachmentLoadOp::LOAD)
            .store_op(vk::AttachmentStoreOp::STORE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
            .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
            .build(),
    ];

    let color_refs = [vk::AttachmentReference {
        attachment: 0,
        layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    }];
    let depth_ref = vk::AttachmentReference {
        attachment: 1,
        layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
    };
    let subpasses = [vk::SubpassDescription::builder()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(&color_refs)
        .depth_stencil_attachment(&depth_ref)
        .build()];

    let dependencies = [vk::SubpassDependency::builder()
        .src_subpass(vk::SUBPASS_EXTERNAL)
        .dst_subpass(0)
        .src_stage_mask(vk::PipelineStageFlags::TRANSFER | vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        .src_access_mask(vk::AccessFlags::TRANSFER_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
        .dst_stage_mask(
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
        )
        .dst_access_mask(
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        )
        .build()];

    let create_info = vk::RenderPassCreateInfo::builder()
        .attachments(&attachments)
        .subpasses(&subpasses)
        .dependencies(&dependencies);

    unsafe { device.create_render_pass(&create_info, None).map_err(VulkanError::Api) }
}

/// Compiled SPIR-V module
struct ShaderModule<'a> {
    module: vk::ShaderModule,
    device: &'a ash::Device,
}

impl<'a> ShaderModule<'a> {
    fn new(device: &'a ash::Device, words: &[u32]) -> VulkanResult<Self> {
        let create_info = vk::ShaderModuleCreateInfo::builder().code(words);
        let module = unsafe {
            device.create_shader_module(&create_info, None).map_err(|e| {
                log::error!("[VULKAN] vkCreateShaderModule failed: {e:?}");
                VulkanError::Api(e)
            })?
        };
        Ok(Self { module, device })
    }

    fn stage_info(&self, stage: vk::ShaderStageFlags) -> vk::PipelineShaderStageCreateInfo {
        vk::PipelineShaderStageCreateInfo::builder()
            .stage(stage)
            .module(self.module)
            .name(ENTRY_POINT)
            .build()
    }
}

impl Drop for ShaderModule<'_> {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_shader_module(self.module, None);
        }
    }
}

/// Vertex input state derived from a vertex layout
///
/// Per-vertex attributes read from binding 0, per-instance attributes from
/// binding 1.
pub struct VulkanVertexFormat {
    layout: VertexLayout,
    bindings: Vec<vk::VertexInputBindingDescription>,
    attributes: Vec<vk::VertexInputAttributeDescription>,
}

impl VulkanVertexFormat {
    /// Translate `layout` into binding and attribute descriptions
    pub fn new(layout: &VertexLayout) -> Self {
        let mut bindings = Vec::with_capacity(2);
        if layout.vertex_stride > 0 {
            bindings.push(vk::VertexInputBindingDescription {
                binding: 0,
                stride: layout.vertex_stride,
                input_rate: vk::VertexInputRate::VERTEX,
            });
        }
        if layout.has_instance_stream() {
            bindings.push(vk::VertexInputBindingDescription {
                binding: 1,
                stride: layout.instance_stride,
                input_rate: vk::VertexInputRate::INSTANCE,
            });
        }

        let attributes = layout
            .attributes
            .iter()
            .map(|attr| vk::VertexInputAttributeDescription {
                location: attr.location,
                binding: u32::from(attr.instanced),
                format: attribute_format(attr.format),
                offset: attr.offset,
            })
            .collect();

        Self {
            layout: layout.clone(),
            bindings,
            attributes,
        }
    }

    /// Layout the format was built from
    pub fn layout(&self) -> &VertexLayout {
        &self.layout
    }

    /// Stream bindings
    pub fn bindings(&self) -> &[vk::VertexInputBindingDescription] {
        &self.bindings
    }

    /// Attribute locations
    pub fn attributes(&self) -> &[vk::VertexInputAttributeDescription] {
        &self.attributes
    }
}

fn attribute_format(format: AttributeFormat) -> vk::Format {
    match format {
        AttributeFormat::Float2 => vk::Format::R32G32_SFLOAT,
        AttributeFormat::Float3 => vk::Format::R32G32B32_SFLOAT,
        AttributeFormat::Float4 => vk::Format::R32G32B32A32_SFLOAT,
        AttributeFormat::UNorm8x4 => vk::Format::R8G8B8A8_UNORM,
    }
}

fn blend_factor(factor: BlendFactor) -> vk::BlendFactor {
    match factor {
        BlendFactor::Zero => vk::BlendFactor::ZERO,
        BlendFactor::One => vk::BlendFactor::ONE,
        BlendFactor::SrcColor => vk::BlendFactor::SRC_COLOR,
        BlendFactor::InvSrcColor => vk::BlendFactor::ONE_MINUS_SRC_COLOR,
        BlendFactor::DstColor => vk::BlendFactor::DST_COLOR,
        BlendFactor::InvDstColor => vk::BlendFactor::ONE_MINUS_DST_COLOR,
        BlendFactor::SrcAlpha => vk::BlendFactor::SRC_ALPHA,
        BlendFactor::InvSrcAlpha => vk::BlendFactor::ONE_MINUS_SRC_ALPHA,
        BlendFactor::DstAlpha => vk::BlendFactor::DST_ALPHA,
        BlendFactor::InvDstAlpha => vk::BlendFactor::ONE_MINUS_DST_ALPHA,
    }
}

fn topology(primitive: Primitive) -> vk::PrimitiveTopology {
    match primitive {
        Primitive::Triangles => vk::PrimitiveTopology::TRIANGLE_LIST,
        Primitive::TriStrips => vk::PrimitiveTopology::TRIANGLE_STRIP,
    }
}

/// Check that a pipeline cache blob was produced by this device and driver
pub fn validate_cache_header(cache: &[u8], properties: &vk::PhysicalDeviceProperties) -> Result<(), String> {
    if cache.len() < CACHE_HEADER_SIZE {
        return Err(format!("pipeline cache is {} bytes, shorter than its header", cache.len()));
    }

    let word = |at: usize| u32::from_le_bytes([cache[at], cache[at + 1], cache[at + 2], cache[at + 3]]);
    let header_version = word(4);
    if header_version != vk::PipelineCacheHeaderVersion::ONE.as_raw() as u32 {
        return Err(format!("unknown pipeline cache header version {header_version}"));
    }
    if word(8) != properties.vendor_id || word(12) != properties.device_id {
        return Err("pipeline cache was produced by a different device".to_string());
    }
    if cache[16..CACHE_HEADER_SIZE] != properties.pipeline_cache_uuid {
        return Err("pipeline cache was produced by a different driver".to_string());
    }
    Ok(())
}

/// Graphics pipeline compiled against the shared render pass and layout
pub struct VulkanPipeline {
    pipeline: vk::Pipeline,
    state: PipelineState,
    device: Arc<DeviceContext>,
}

impl VulkanPipeline {
    /// Build a pipeline and return it with the pipeline cache data it produced
    pub fn new(
        device: &Arc<DeviceContext>,
        vertex: &[u32],
        fragment: &[u32],
        cache: &[u8],
        format: &VulkanVertexFormat,
        state: PipelineState,
    ) -> VulkanResult<(Self, Vec<u8>)> {
        let raw = &device.device;
        let vertex_module = ShaderModule::new(raw, vertex)?;
        let fragment_module = ShaderModule::new(raw, fragment)?;
        let shader_stages = [
            vertex_module.stage_info(vk::ShaderStageFlags::VERTEX),
            fragment_module.stage_info(vk::ShaderStageFlags::FRAGMENT),
        ];

        let vertex_input = vk::PipelineVertexInputStateCreateInfo::builder()
            .vertex_binding_descriptions(format.bindings())
            .vertex_attribute_descriptions(format.attributes());

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
            .topology(topology(state.primitive))
            .primitive_restart_enable(false);

        let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
            .viewport_count(1)
            .scissor_count(1);
        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state = vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&dynamic_states);

        let rasterizer = vk::PipelineRasterizationStateCreateInfo::builder()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(vk::PolygonMode::FILL)
            .line_width(1.0)
            .cull_mode(if state.backface_culling {
                vk::CullModeFlags::BACK
            } else {
                vk::CullModeFlags::NONE
            })
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
            .depth_bias_enable(false);

        let multisampling = vk::PipelineMultisampleStateCreateInfo::builder()
            .sample_shading_enable(false)
            .rasterization_samples(device.samples);

        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::builder()
            .depth_test_enable(state.depth_test)
            .depth_write_enable(state.depth_write)
            .depth_compare_op(vk::CompareOp::LESS_OR_EQUAL)
            .depth_bounds_test_enable(false)
            .stencil_test_enable(false);

        let color_blend_attachments = [vk::PipelineColorBlendAttachmentState::builder()
            .color_write_mask(vk::ColorComponentFlags::RGBA)
            .blend_enable(state.blending_enabled())
            .src_color_blend_factor(blend_factor(state.src_factor))
            .dst_color_blend_factor(blend_factor(state.dst_factor))
            .color_blend_op(vk::BlendOp::ADD)
            .src_alpha_blend_factor(blend_factor(state.src_factor))
            .dst_alpha_blend_factor(blend_factor(state.dst_factor))
            .alpha_blend_op(vk::BlendOp::ADD)
            .build()];
        let color_blending = vk::PipelineColorBlendStateCreateInfo::builder()
            .logic_op_enable(false)
            .attachments(&color_blend_attachments);

        let cache_info = vk::PipelineCacheCreateInfo::builder().initial_data(cache);
        let pipeline_cache = unsafe {
            raw.create_pipeline_cache(&cache_info, None)
                .map_err(VulkanError::Api)?
        };

        let pipeline_info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(&shader_stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterizer)
            .multisample_state(&multisampling)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blending)
            .dynamic_state(&dynamic_state)
            .layout(device.pipeline_layout)
            .render_pass(device.render_pass)
            .subpass(0);

        let created = unsafe { raw.create_graphics_pipelines(pipeline_cache, &[pipeline_info.build()], None) };
        let cache_data = unsafe { raw.get_pipeline_cache_data(pipeline_cache) };
        unsafe { raw.destroy_pipeline_cache(pipeline_cache, None) };

        let pipeline = created.map_err(|(_, err)| VulkanError::Api(err))?[0];
        let this = Self {
            pipeline,
            state,
            device: Arc::clone(device),
        };
        let cache_data = cache_data.map_err(VulkanError::Api)?;

        log::debug!(
            "[VULKAN] Created pipeline {:?} ({} byte cache)",
            this.pipeline,
            cache_data.len()
        );
        Ok((this, cache_data))
    }

    /// Get the pipeline handle
    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }

    /// Fixed-function state the pipeline was built with
    pub fn state(&self) -> &PipelineState {
        &self.state
    }
}

impl Drop for VulkanPipeline {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_pipeline(self.pipeline, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graphics::{VertexElementDescriptor, VertexSemantic};

    fn properties() -> vk::PhysicalDeviceProperties {
        vk::PhysicalDeviceProperties {
            vendor_id: 0x10de,
            device_id: 0x2204,
            pipeline_cache_uuid: [7; vk::UUID_SIZE],
            ..Default::default()
        }
    }

    fn header(vendor: u32, device: u32, uuid: [u8; vk::UUID_SIZE]) -> Vec<u8> {
        let mut cache = Vec::new();
        cache.extend_from_slice(&(CACHE_HEADER_SIZE as u32).to_le_bytes());
        cache.extend_from_slice(&1u32.to_le_bytes());
        cache.extend_from_slice(&vendor.to_le_bytes());
        cache.extend_from_slice(&device.to_le_bytes());
        cache.extend_from_slice(&uuid);
        cache
    }

    /// Cache blobs are accepted only from the same device and driver
    #[test]
    fn test_cache_header_validation() {
        let props = properties();
        assert!(validate_cache_header(&header(0x10de, 0x2204, [7; 16]), &props).is_ok());
        assert!(validate_cache_header(&header(0x1002, 0x2204, [7; 16]), &props).is_err());
        assert!(validate_cache_header(&header(0x10de, 0x2204, [8; 16]), &props).is_err());
        assert!(validate_cache_header(b"HLPC", &props).is_err());
    }

    /// Instance attributes read from the second stream binding
    #[test]
    fn test_vertex_format_streams() {
        let layout = VertexLayout::from_elements(&[
            VertexElementDescriptor::new(VertexSemantic::Position3, 0),
            VertexElementDescriptor::new(VertexSemantic::ColorUNorm, 0),
            VertexElementDescriptor::instanced(VertexSemantic::UV4, 0),
        ]);
        let format = VulkanVertexFormat::new(&layout);

        assert_eq!(format.bindings().len(), 2);
        assert_eq!(format.bindings()[0].stride, 16);
        assert_eq!(format.bindings()[1].input_rate, vk::VertexInputRate::INSTANCE);
        assert_eq!(format.attributes()[1].format, vk::Format::R8G8B8A8_UNORM);
        assert_eq!(format.attributes()[2].binding, 1);
        assert_eq!(format.attributes()[2].offset, 0);
    }

    /// Overwrite state maps onto one/zero factors
    #[test]
    fn test_blend_factor_mapping() {
        assert_eq!(blend_factor(BlendFactor::InvSrcAlpha), vk::BlendFactor::ONE_MINUS_SRC_ALPHA);
        assert_eq!(topology(Primitive::TriStrips), vk::PrimitiveTopology::TRIANGLE_STRIP);
    }
}
