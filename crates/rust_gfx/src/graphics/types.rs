//! Resource descriptions shared by every backend

use bitflags::bitflags;

/// Backend family a factory was created for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Platform {
    /// In-process deterministic device
    Headless,
    /// Vulkan device
    Vulkan,
}

impl Platform {
    /// Human readable backend name
    pub const fn name(self) -> &'static str {
        match self {
            Self::Headless => "Headless",
            Self::Vulkan => "Vulkan",
        }
    }
}

/// Width and height in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Extent2D {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
}

impl Extent2D {
    /// Create an extent
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// A minimized window reports a zero-sized extent
    pub const fn is_empty(self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl From<(u32, u32)> for Extent2D {
    fn from((width, height): (u32, u32)) -> Self {
        Self { width, height }
    }
}

/// Integer rectangle used for viewports, scissors and resolves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rect2D {
    /// Left edge
    pub x: i32,
    /// Top edge
    pub y: i32,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
}

impl Rect2D {
    /// Create a rectangle
    pub const fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// Rectangle covering a whole extent
    pub const fn from_extent(extent: Extent2D) -> Self {
        Self::new(0, 0, extent.width, extent.height)
    }
}

/// How a buffer is consumed by the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferUse {
    /// Per-vertex or per-instance attributes
    Vertex,
    /// 32-bit indices
    Index,
    /// Uniform block data
    Uniform,
}

/// Texel formats supported by textures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    /// 8-bit RGBA
    Rgba8,
    /// 8-bit intensity
    I8,
    /// BC1 block compression
    Dxt1,
}

impl TextureFormat {
    /// Bytes occupied by one mip level of the given size
    pub fn level_size(self, width: u32, height: u32) -> usize {
        let (width, height) = (width.max(1) as usize, height.max(1) as usize);
        match self {
            Self::Rgba8 => width * height * 4,
            Self::I8 => width * height,
            Self::Dxt1 => width.div_ceil(4) * height.div_ceil(4) * 8,
        }
    }

    /// Bytes occupied by a full chain of `mips` levels
    pub fn chain_size(self, width: u32, height: u32, mips: u32) -> usize {
        (0..mips)
            .map(|level| self.level_size(width >> level, height >> level))
            .sum()
    }
}

/// Longest mip chain for an image of the given size
pub fn max_mip_levels(width: u32, height: u32) -> u32 {
    32 - width.max(height).max(1).leading_zeros()
}

/// Meaning of one vertex attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VertexSemantic {
    /// Three floats
    Position3,
    /// Four floats
    Position4,
    /// Three floats
    Normal3,
    /// Four floats
    Normal4,
    /// Four floats
    Color,
    /// Four normalized bytes
    ColorUNorm,
    /// Two floats
    UV2,
    /// Four floats
    UV4,
    /// Four floats
    Weight,
    /// Four rows of four floats
    ModelView,
}

/// Storage of one attribute location
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttributeFormat {
    /// `vec2`
    Float2,
    /// `vec3`
    Float3,
    /// `vec4`
    Float4,
    /// Four normalized unsigned bytes read as `vec4`
    UNorm8x4,
}

impl AttributeFormat {
    /// Size in bytes
    pub const fn size(self) -> u32 {
        match self {
            Self::Float2 => 8,
            Self::Float3 => 12,
            Self::Float4 => 16,
            Self::UNorm8x4 => 4,
        }
    }
}

impl VertexSemantic {
    /// Format of each location and how many consecutive locations it spans
    pub const fn format(self) -> (AttributeFormat, u32) {
        match self {
            Self::Position3 | Self::Normal3 => (AttributeFormat::Float3, 1),
            Self::Position4 | Self::Normal4 | Self::Color | Self::UV4 | Self::Weight => {
                (AttributeFormat::Float4, 1)
            }
            Self::ColorUNorm => (AttributeFormat::UNorm8x4, 1),
            Self::UV2 => (AttributeFormat::Float2, 1),
            Self::ModelView => (AttributeFormat::Float4, 4),
        }
    }

    /// Size in bytes of the whole attribute
    pub const fn size(self) -> u32 {
        let (format, locations) = self.format();
        format.size() * locations
    }
}

/// One element of a vertex format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VertexElementDescriptor {
    /// Attribute meaning
    pub semantic: VertexSemantic,
    /// Distinguishes repeated semantics (UV0, UV1, ...)
    pub semantic_index: u32,
    /// Sourced from the instance buffer instead of the vertex buffer
    pub instanced: bool,
}

impl VertexElementDescriptor {
    /// Per-vertex element
    pub const fn new(semantic: VertexSemantic, semantic_index: u32) -> Self {
        Self {
            semantic,
            semantic_index,
            instanced: false,
        }
    }

    /// Per-instance element
    pub const fn instanced(semantic: VertexSemantic, semantic_index: u32) -> Self {
        Self {
            semantic,
            semantic_index,
            instanced: true,
        }
    }
}

/// A resolved attribute location
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VertexAttribute {
    /// Shader input location
    pub location: u32,
    /// Byte offset inside its stream
    pub offset: u32,
    /// Storage format
    pub format: AttributeFormat,
    /// Read from the instance stream
    pub instanced: bool,
}

/// Vertex and instance stream layout derived from a list of elements
///
/// Elements are assigned consecutive locations in declaration order.
/// Per-vertex and per-instance elements are packed into separate streams.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VertexLayout {
    /// Every attribute location in order
    pub attributes: Vec<VertexAttribute>,
    /// Stride of the per-vertex stream
    pub vertex_stride: u32,
    /// Stride of the per-instance stream
    pub instance_stride: u32,
}

impl VertexLayout {
    /// Pack elements into vertex and instance streams
    pub fn from_elements(elements: &[VertexElementDescriptor]) -> Self {
        let mut layout = Self::default();
        let mut location = 0;

        for element in elements {
            let (format, locations) = element.semantic.format();
            for _ in 0..locations {
                let stride = if element.instanced {
                    &mut layout.instance_stride
                } else {
                    &mut layout.vertex_stride
                };
                layout.attributes.push(VertexAttribute {
                    location,
                    offset: *stride,
                    format,
                    instanced: element.instanced,
                });
                *stride += format.size();
                location += 1;
            }
        }

        layout
    }

    /// Locations provided by this layout
    pub fn locations(&self) -> Vec<u32> {
        self.attributes.iter().map(|attr| attr.location).collect()
    }

    /// Whether any attribute is sourced per instance
    pub fn has_instance_stream(&self) -> bool {
        self.instance_stride > 0
    }
}

/// Source and destination blend factors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlendFactor {
    /// 0
    Zero,
    /// 1
    One,
    /// Source color
    SrcColor,
    /// 1 - source color
    InvSrcColor,
    /// Destination color
    DstColor,
    /// 1 - destination color
    InvDstColor,
    /// Source alpha
    SrcAlpha,
    /// 1 - source alpha
    InvSrcAlpha,
    /// Destination alpha
    DstAlpha,
    /// 1 - destination alpha
    InvDstAlpha,
}

/// Primitive assembly mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Primitive {
    /// Independent triangles
    Triangles,
    /// Triangle strips
    TriStrips,
}

/// Fixed-function state baked into a pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PipelineState {
    /// Source blend factor
    pub src_factor: BlendFactor,
    /// Destination blend factor
    pub dst_factor: BlendFactor,
    /// Primitive topology
    pub primitive: Primitive,
    /// Depth testing
    pub depth_test: bool,
    /// Depth writes
    pub depth_write: bool,
    /// Cull back faces
    pub backface_culling: bool,
}

impl Default for PipelineState {
    fn default() -> Self {
        Self {
            src_factor: BlendFactor::One,
            dst_factor: BlendFactor::Zero,
            primitive: Primitive::Triangles,
            depth_test: true,
            depth_write: true,
            backface_culling: true,
        }
    }
}

impl PipelineState {
    /// Whether the factors describe anything other than overwrite
    pub fn blending_enabled(&self) -> bool {
        !(self.src_factor == BlendFactor::One && self.dst_factor == BlendFactor::Zero)
    }
}

/// Programmable pipeline stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    /// Vertex shader
    Vertex,
    /// Fragment shader
    Fragment,
}

bitflags! {
    /// Stages a uniform buffer is visible to
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ShaderStages: u32 {
        /// Vertex shader
        const VERTEX = 0b01;
        /// Fragment shader
        const FRAGMENT = 0b10;
    }
}

impl From<ShaderStage> for ShaderStages {
    fn from(stage: ShaderStage) -> Self {
        match stage {
            ShaderStage::Vertex => Self::VERTEX,
            ShaderStage::Fragment => Self::FRAGMENT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Mip chain sizes shrink per level and clamp at one texel
    #[test]
    fn test_chain_size() {
        assert_eq!(TextureFormat::Rgba8.chain_size(4, 4, 1), 64);
        assert_eq!(TextureFormat::Rgba8.chain_size(4, 4, 3), 64 + 16 + 4);
        assert_eq!(TextureFormat::I8.chain_size(4, 1, 3), 4 + 2 + 1);
        assert_eq!(TextureFormat::Dxt1.chain_size(8, 8, 2), 32 + 8);
        assert_eq!(max_mip_levels(4, 4), 3);
        assert_eq!(max_mip_levels(1, 1), 1);
        assert_eq!(max_mip_levels(256, 16), 9);
    }

    /// Vertex and instance elements pack into separate streams
    #[test]
    fn test_vertex_layout_packing() {
        let layout = VertexLayout::from_elements(&[
            VertexElementDescriptor::new(VertexSemantic::Position3, 0),
            VertexElementDescriptor::new(VertexSemantic::UV2, 0),
            VertexElementDescriptor::instanced(VertexSemantic::ModelView, 0),
        ]);

        assert_eq!(layout.vertex_stride, 20);
        assert_eq!(layout.instance_stride, 64);
        assert_eq!(layout.locations(), vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(layout.attributes[1].offset, 12);
        assert_eq!(layout.attributes[5].offset, 48);
        assert!(layout.attributes[5].instanced);
        assert!(layout.has_instance_stream());
    }

    /// Overwrite blending is reported as disabled
    #[test]
    fn test_default_state_disables_blending() {
        assert!(!PipelineState::default().blending_enabled());
        let alpha = PipelineState {
            src_factor: BlendFactor::SrcAlpha,
            dst_factor: BlendFactor::InvSrcAlpha,
            ..PipelineState::default()
        };
        assert!(alpha.blending_enabled());
    }
}
