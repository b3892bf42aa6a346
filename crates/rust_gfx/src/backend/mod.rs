//! Backend capability interface
//!
//! A backend provides three facets behind one trait:
//!
//! - **Context**: creation of buffers, textures, vertex formats, pipelines
//!   and data bindings. Called from any loader thread.
//! - **Queue**: submission of recorded frames, tracked with a monotonically
//!   increasing generation counter. Submission is serialized by a lock owned
//!   by the backend, separate from the committed-data registry lock.
//! - **Surface**: swap-chain creation, acquisition and presentation. Only the
//!   render thread touches surfaces.
//!
//! Physical destruction of every object happens in `Drop` of the associated
//! types. The factory decides *when* the last owner goes away; the backend
//! only decides *how* the object is freed.
//!
//! Backends form a closed set ([`HeadlessBackend`], [`VulkanBackend`]) chosen
//! once at startup through [`crate::config::BackendKind`].

pub mod headless;
pub mod vulkan;

pub use headless::HeadlessBackend;
pub use vulkan::VulkanBackend;

use std::ops::Range;

use crate::error::GfxResult;
use crate::graphics::{
    BufferUse, Extent2D, PipelineState, Platform, Rect2D, ShaderStages, TextureFormat, VertexLayout,
};

/// Buffer creation parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferDesc {
    /// Pipeline usage
    pub usage: BufferUse,
    /// Size in bytes
    pub size: usize,
    /// Rewritten by the CPU after creation
    pub dynamic: bool,
}

/// Texture variants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureKind {
    /// Immutable, with a mip chain
    Static {
        /// Number of mip levels
        mips: u32,
    },
    /// Immutable array of equally sized layers
    StaticArray {
        /// Number of layers
        layers: u32,
    },
    /// Single level rewritten by the CPU
    Dynamic,
    /// Color and depth target that can be copied into sampleable images
    Render {
        /// Keep a sampleable copy of the color attachment
        color_binding: bool,
        /// Keep a sampleable copy of the depth attachment
        depth_binding: bool,
        /// Samples per texel of the attachments, 1 when not multisampled
        samples: u32,
    },
}

/// Texture creation parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureDesc {
    /// Variant
    pub kind: TextureKind,
    /// Texel format
    pub format: TextureFormat,
    /// Size of level zero
    pub extent: Extent2D,
}

impl TextureDesc {
    /// Number of mip levels
    pub const fn mip_levels(&self) -> u32 {
        match self.kind {
            TextureKind::Static { mips } => mips,
            _ => 1,
        }
    }

    /// Samples per texel, 1 for everything but multisampled render textures
    pub const fn samples(&self) -> u32 {
        match self.kind {
            TextureKind::Render { samples, .. } => samples,
            _ => 1,
        }
    }

    /// Number of array layers
    pub const fn layers(&self) -> u32 {
        match self.kind {
            TextureKind::StaticArray { layers } => layers,
            _ => 1,
        }
    }

    /// Bytes of texel data expected at creation or load
    pub fn data_size(&self) -> usize {
        self.format.chain_size(self.extent.width, self.extent.height, self.mip_levels()) * self.layers() as usize
    }
}

/// Compiled pipeline inputs handed to the backend
pub struct PipelineDesc<'a, B: Backend> {
    /// Vertex stage SPIR-V
    pub vertex: &'a [u32],
    /// Fragment stage SPIR-V
    pub fragment: &'a [u32],
    /// Previously emitted pipeline cache blob, empty when none
    pub cache: &'a [u8],
    /// Backend vertex format object
    pub vertex_format: &'a B::VertexFormat,
    /// Stream layout of the vertex format
    pub layout: &'a VertexLayout,
    /// Fixed-function state
    pub state: PipelineState,
}

/// One uniform slot of a data binding
pub struct UniformDesc<'a, B: Backend> {
    /// Source buffer
    pub buffer: &'a B::Buffer,
    /// Stages the slot is visible to
    pub stages: ShaderStages,
    /// Byte range bound to the slot
    pub range: Range<usize>,
}

/// Everything a data binding references, resolved to backend objects
pub struct BindingDesc<'a, B: Backend> {
    /// Pipeline the binding is drawn with
    pub pipeline: &'a B::Pipeline,
    /// Vertex format, when the backend asks for one
    pub vertex_format: Option<&'a B::VertexFormat>,
    /// Stream layout of the pipeline's vertex format
    pub layout: &'a VertexLayout,
    /// Per-vertex stream
    pub vertex_buffer: Option<(&'a B::Buffer, usize)>,
    /// Per-instance stream
    pub instance_buffer: Option<(&'a B::Buffer, usize)>,
    /// Index stream
    pub index_buffer: Option<(&'a B::Buffer, usize)>,
    /// Uniform slots in binding order
    pub uniforms: Vec<UniformDesc<'a, B>>,
    /// Texture slots in binding order
    pub textures: Vec<&'a B::Texture>,
}

/// A recorded command lowered to backend objects
pub enum DeviceCommand<'a, B: Backend> {
    /// Bind pipeline, descriptors and streams
    SetShaderDataBinding(&'a B::Binding),
    /// Direct subsequent draws into a render texture
    SetRenderTarget(&'a B::Texture),
    /// Set the viewport
    SetViewport(Rect2D),
    /// Set the scissor rectangle
    SetScissor(Rect2D),
    /// Color used by later clears
    SetClearColor([f32; 4]),
    /// Clear the current render target
    ClearTarget {
        /// Clear the color attachment
        color: bool,
        /// Clear the depth attachment
        depth: bool,
    },
    /// Non-indexed draw
    Draw {
        /// First vertex
        start: u32,
        /// Vertex count
        count: u32,
    },
    /// Indexed draw
    DrawIndexed {
        /// First index
        start: u32,
        /// Index count
        count: u32,
    },
    /// Instanced non-indexed draw
    DrawInstances {
        /// First vertex
        start: u32,
        /// Vertex count
        count: u32,
        /// Instance count
        instances: u32,
    },
    /// Copy part of a render texture into its sampleable images, resolving
    /// multisampled attachments
    ResolveBindTexture {
        /// Render texture
        texture: &'a B::Texture,
        /// Region to copy
        rect: Rect2D,
        /// Whether `rect` is measured from the top-left corner
        top_left_origin: bool,
        /// Copy color
        color: bool,
        /// Copy depth
        depth: bool,
    },
    /// Resolve a render texture and copy it to the acquired back buffer
    ResolveDisplay(&'a B::Texture),
}

/// The back buffer a submission renders into before presentation
pub struct PresentTarget<'a, B: Backend> {
    /// Active swap chain
    pub chain: &'a mut B::SwapChain,
    /// Acquired buffer index
    pub index: u32,
}

/// Capability interface implemented once per backend
pub trait Backend: Sized + Send + Sync + 'static {
    /// Buffer object
    type Buffer: Send + Sync + 'static;
    /// Texture object, covering every texture variant
    type Texture: Send + Sync + 'static;
    /// Vertex format object
    type VertexFormat: Send + Sync + 'static;
    /// Graphics pipeline object
    type Pipeline: Send + Sync + 'static;
    /// Shader data binding object
    type Binding: Send + Sync + 'static;
    /// Window surface
    type Surface: Send + 'static;
    /// Swap chain built against a surface
    type SwapChain: Send + 'static;

    /// Backend family
    fn platform(&self) -> Platform;

    /// Backend name
    fn platform_name(&self) -> &'static str {
        self.platform().name()
    }

    /// Whether data bindings need an explicit vertex format object
    fn binding_needs_vertex_format(&self) -> bool;

    /// Samples per texel that render textures and pipelines are built with
    fn draw_samples(&self) -> u32;

    // Context facet

    /// Create a buffer, optionally filled with `contents`
    fn create_buffer(&self, desc: &BufferDesc, contents: Option<&[u8]>) -> GfxResult<Self::Buffer>;

    /// Overwrite the start of a dynamic buffer
    fn write_buffer(&self, buffer: &Self::Buffer, data: &[u8]) -> GfxResult<()>;

    /// Create a texture, optionally filled with `contents`
    fn create_texture(&self, desc: &TextureDesc, contents: Option<&[u8]>) -> GfxResult<Self::Texture>;

    /// Replace the texels of a dynamic texture
    fn write_texture(&self, texture: &Self::Texture, data: &[u8]) -> GfxResult<()>;

    /// Create a vertex format object
    fn create_vertex_format(&self, layout: &VertexLayout) -> GfxResult<Self::VertexFormat>;

    /// Create a pipeline and return it with its pipeline cache blob
    fn create_pipeline(&self, desc: &PipelineDesc<'_, Self>) -> GfxResult<(Self::Pipeline, Vec<u8>)>;

    /// Create a shader data binding
    fn create_binding(&self, desc: &BindingDesc<'_, Self>) -> GfxResult<Self::Binding>;

    // Queue facet

    /// Submit one frame of commands and return its generation
    fn submit(&self, commands: &[DeviceCommand<'_, Self>], target: Option<PresentTarget<'_, Self>>) -> GfxResult<u64>;

    /// Generation of the most recent submission
    fn submitted_generation(&self) -> u64;

    /// Highest generation the device has finished
    fn completed_generation(&self) -> GfxResult<u64>;

    /// Block until `generation` has finished
    fn wait_for_generation(&self, generation: u64) -> GfxResult<()>;

    // Surface facet

    /// Build a swap chain for `surface`, chaining from `previous` when resizing
    fn create_swap_chain(
        &self,
        surface: &mut Self::Surface,
        extent: Extent2D,
        buffers: u32,
        previous: Option<&Self::SwapChain>,
    ) -> GfxResult<Self::SwapChain>;

    /// Advance a pending swap chain and report whether it can present
    fn poll_swap_chain(&self, chain: &mut Self::SwapChain) -> bool;

    /// Number of presentable buffers
    fn swap_chain_buffer_count(&self, chain: &Self::SwapChain) -> u32;

    /// Extent the swap chain was built with
    fn swap_chain_extent(&self, chain: &Self::SwapChain) -> Extent2D;

    /// Acquire the next presentable buffer; `hint` is the expected index
    fn acquire_next_buffer(&self, chain: &mut Self::SwapChain, hint: u32) -> GfxResult<u32>;

    /// Present a previously acquired buffer
    fn present(&self, chain: &mut Self::SwapChain, index: u32) -> GfxResult<()>;
}
