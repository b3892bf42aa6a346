//! Resource objects and the handles returned to callers
//!
//! Each committed batch ([`GraphicsData`](super::GraphicsData)) holds the only
//! long-lived strong references to its objects. Handles are weak: once the
//! batch's token is released and retirement completes, queries through a
//! handle report the object as gone. Bindings and in-flight command lists
//! hold their own strong references so nothing they use is freed early.
//!
//! Objects keep the backend alive through an `Arc`, so backend devices always
//! outlive the objects created from them.

use std::fmt;
use std::sync::{Arc, Weak};

use bytemuck::Pod;

use crate::backend::{Backend, BufferDesc, TextureDesc};
use crate::error::GfxResult;
use crate::graphics::shader::ShaderReflection;
use crate::graphics::{BufferUse, Extent2D, PipelineState, TextureFormat, VertexElementDescriptor, VertexLayout};

/// Buffer object
pub(crate) struct BufferObject<B: Backend> {
    pub(crate) raw: B::Buffer,
    pub(crate) desc: BufferDesc,
    pub(crate) backend: Arc<B>,
}

/// Texture object
pub(crate) struct TextureObject<B: Backend> {
    pub(crate) raw: B::Texture,
    pub(crate) desc: TextureDesc,
    pub(crate) backend: Arc<B>,
}

/// Vertex format object
pub(crate) struct VertexFormatObject<B: Backend> {
    pub(crate) raw: B::VertexFormat,
    pub(crate) elements: Vec<VertexElementDescriptor>,
    pub(crate) layout: VertexLayout,
    pub(crate) _backend: Arc<B>,
}

/// Pipeline object
pub(crate) struct PipelineObject<B: Backend> {
    pub(crate) raw: B::Pipeline,
    pub(crate) state: PipelineState,
    pub(crate) reflection: ShaderReflection,
    pub(crate) vertex_format: Arc<VertexFormatObject<B>>,
    pub(crate) _backend: Arc<B>,
}

/// Shader data binding object
pub(crate) struct BindingObject<B: Backend> {
    pub(crate) raw: B::Binding,
    pub(crate) pipeline: Arc<PipelineObject<B>>,
    pub(crate) vertex_format: Option<Arc<VertexFormatObject<B>>>,
    pub(crate) vertex_buffer: Option<Arc<BufferObject<B>>>,
    pub(crate) instance_buffer: Option<Arc<BufferObject<B>>>,
    pub(crate) index_buffer: Option<Arc<BufferObject<B>>>,
    pub(crate) uniforms: Vec<Arc<BufferObject<B>>>,
    pub(crate) textures: Vec<Arc<TextureObject<B>>>,
    pub(crate) _backend: Arc<B>,
}

macro_rules! resource_handle {
    ($(#[$meta:meta])* $name:ident => $object:ident) => {
        $(#[$meta])*
        pub struct $name<B: Backend> {
            inner: Weak<$object<B>>,
        }

        impl<B: Backend> $name<B> {
            pub(crate) fn new(object: &Arc<$object<B>>) -> Self {
                Self {
                    inner: Arc::downgrade(object),
                }
            }

            /// Whether the owning batch still holds this resource
            pub fn is_alive(&self) -> bool {
                self.inner.strong_count() > 0
            }

            pub(crate) fn upgrade(&self) -> Option<Arc<$object<B>>> {
                self.inner.upgrade()
            }

            /// Upgrade or panic: using a destroyed resource is a contract violation
            pub(crate) fn live(&self) -> Arc<$object<B>> {
                match self.inner.upgrade() {
                    Some(object) => object,
                    None => panic!(
                        "{} used after its graphics data was destroyed",
                        stringify!($name)
                    ),
                }
            }
        }

        impl<B: Backend> Clone for $name<B> {
            fn clone(&self) -> Self {
                Self {
                    inner: self.inner.clone(),
                }
            }
        }

        impl<B: Backend> fmt::Debug for $name<B> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.debug_struct(stringify!($name))
                    .field("alive", &self.is_alive())
                    .finish()
            }
        }
    };
}

resource_handle!(
    /// Immutable buffer filled at creation
    StaticBuffer => BufferObject
);
resource_handle!(
    /// Buffer rewritten by the CPU between frames
    DynamicBuffer => BufferObject
);
resource_handle!(
    /// Immutable mipmapped texture
    StaticTexture => TextureObject
);
resource_handle!(
    /// Immutable layered texture
    StaticArrayTexture => TextureObject
);
resource_handle!(
    /// Texture rewritten by the CPU between frames
    DynamicTexture => TextureObject
);
resource_handle!(
    /// Offscreen color and depth target
    RenderTexture => TextureObject
);
resource_handle!(
    /// Vertex attribute layout
    VertexFormat => VertexFormatObject
);
resource_handle!(
    /// Compiled graphics pipeline
    ShaderPipeline => PipelineObject
);
resource_handle!(
    /// Pipeline plus everything a draw call reads
    ShaderDataBinding => BindingObject
);

impl<B: Backend> StaticBuffer<B> {
    /// Size in bytes, `None` once destroyed
    pub fn size(&self) -> Option<usize> {
        self.upgrade().map(|obj| obj.desc.size)
    }

    /// Pipeline usage, `None` once destroyed
    pub fn usage(&self) -> Option<BufferUse> {
        self.upgrade().map(|obj| obj.desc.usage)
    }
}

impl<B: Backend> DynamicBuffer<B> {
    /// Size in bytes, `None` once destroyed
    pub fn size(&self) -> Option<usize> {
        self.upgrade().map(|obj| obj.desc.size)
    }

    /// Pipeline usage, `None` once destroyed
    pub fn usage(&self) -> Option<BufferUse> {
        self.upgrade().map(|obj| obj.desc.usage)
    }

    /// Overwrite the start of the buffer
    ///
    /// # Panics
    /// If the buffer was destroyed or `data` is larger than the buffer.
    pub fn load(&self, data: &[u8]) -> GfxResult<()> {
        let obj = self.live();
        assert!(
            data.len() <= obj.desc.size,
            "dynamic buffer load of {} bytes exceeds its {} byte size",
            data.len(),
            obj.desc.size
        );
        obj.backend.write_buffer(&obj.raw, data)
    }

    /// Overwrite the start of the buffer with plain-old-data values
    pub fn load_typed<T: Pod>(&self, data: &[T]) -> GfxResult<()> {
        self.load(bytemuck::cast_slice(data))
    }
}

macro_rules! texture_queries {
    ($name:ident) => {
        impl<B: Backend> $name<B> {
            /// Size of level zero, `None` once destroyed
            pub fn extent(&self) -> Option<Extent2D> {
                self.upgrade().map(|obj| obj.desc.extent)
            }

            /// Texel format, `None` once destroyed
            pub fn format(&self) -> Option<TextureFormat> {
                self.upgrade().map(|obj| obj.desc.format)
            }
        }
    };
}

texture_queries!(StaticTexture);
texture_queries!(StaticArrayTexture);
texture_queries!(DynamicTexture);
texture_queries!(RenderTexture);

impl<B: Backend> StaticTexture<B> {
    /// Number of mip levels, `None` once destroyed
    pub fn mip_levels(&self) -> Option<u32> {
        self.upgrade().map(|obj| obj.desc.mip_levels())
    }
}

impl<B: Backend> RenderTexture<B> {
    /// Samples per texel of the attachments, `None` once destroyed
    pub fn samples(&self) -> Option<u32> {
        self.upgrade().map(|obj| obj.desc.samples())
    }
}

impl<B: Backend> StaticArrayTexture<B> {
    /// Number of layers, `None` once destroyed
    pub fn layers(&self) -> Option<u32> {
        self.upgrade().map(|obj| obj.desc.layers())
    }
}

impl<B: Backend> DynamicTexture<B> {
    /// Replace the texels of the texture
    ///
    /// # Panics
    /// If the texture was destroyed or `data` does not cover exactly one level.
    pub fn load(&self, data: &[u8]) -> GfxResult<()> {
        let obj = self.live();
        let expected = obj.desc.data_size();
        assert_eq!(
            data.len(),
            expected,
            "dynamic texture load must supply exactly {expected} bytes"
        );
        obj.backend.write_texture(&obj.raw, data)
    }
}

impl<B: Backend> VertexFormat<B> {
    /// Elements in declaration order, `None` once destroyed
    pub fn elements(&self) -> Option<Vec<VertexElementDescriptor>> {
        self.upgrade().map(|obj| obj.elements.clone())
    }

    /// Derived stream layout, `None` once destroyed
    pub fn layout(&self) -> Option<VertexLayout> {
        self.upgrade().map(|obj| obj.layout.clone())
    }
}

impl<B: Backend> ShaderPipeline<B> {
    /// Fixed-function state, `None` once destroyed
    pub fn state(&self) -> Option<PipelineState> {
        self.upgrade().map(|obj| obj.state)
    }

    /// Interface reflected from the pipeline's SPIR-V, `None` once destroyed
    pub fn reflection(&self) -> Option<ShaderReflection> {
        self.upgrade().map(|obj| obj.reflection.clone())
    }

    /// Vertex layout the pipeline was built against, `None` once destroyed
    pub fn vertex_layout(&self) -> Option<VertexLayout> {
        self.upgrade().map(|obj| obj.vertex_format.layout.clone())
    }
}

/// Summary of what a data binding references
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindingSummary {
    /// Explicit vertex format attached
    pub has_vertex_format: bool,
    /// Vertex stream attached
    pub has_vertex_buffer: bool,
    /// Instance stream attached
    pub has_instance_buffer: bool,
    /// Index stream attached
    pub has_index_buffer: bool,
    /// Uniform slots in use
    pub uniform_count: usize,
    /// Texture slots in use
    pub texture_count: usize,
}

impl<B: Backend> ShaderDataBinding<B> {
    /// What the binding references, `None` once destroyed
    pub fn summary(&self) -> Option<BindingSummary> {
        self.upgrade().map(|obj| BindingSummary {
            has_vertex_format: obj.vertex_format.is_some(),
            has_vertex_buffer: obj.vertex_buffer.is_some(),
            has_instance_buffer: obj.instance_buffer.is_some(),
            has_index_buffer: obj.index_buffer.is_some(),
            uniform_count: obj.uniforms.len(),
            texture_count: obj.textures.len(),
        })
    }

    /// Reflection of the bound pipeline, `None` once destroyed
    pub fn pipeline_reflection(&self) -> Option<ShaderReflection> {
        self.upgrade().map(|obj| obj.pipeline.reflection.clone())
    }
}

/// Any buffer handle usable as a binding input
pub enum AnyBuffer<B: Backend> {
    /// Static buffer
    Static(StaticBuffer<B>),
    /// Dynamic buffer
    Dynamic(DynamicBuffer<B>),
}

impl<B: Backend> AnyBuffer<B> {
    pub(crate) fn live(&self) -> Arc<BufferObject<B>> {
        match self {
            Self::Static(buffer) => buffer.live(),
            Self::Dynamic(buffer) => buffer.live(),
        }
    }
}

impl<B: Backend> From<&StaticBuffer<B>> for AnyBuffer<B> {
    fn from(buffer: &StaticBuffer<B>) -> Self {
        Self::Static(buffer.clone())
    }
}

impl<B: Backend> From<&DynamicBuffer<B>> for AnyBuffer<B> {
    fn from(buffer: &DynamicBuffer<B>) -> Self {
        Self::Dynamic(buffer.clone())
    }
}

/// Any texture handle usable as a binding input
pub enum AnyTexture<B: Backend> {
    /// Static texture
    Static(StaticTexture<B>),
    /// Static array texture
    StaticArray(StaticArrayTexture<B>),
    /// Dynamic texture
    Dynamic(DynamicTexture<B>),
    /// Render texture, sampled through its bind copies
    Render(RenderTexture<B>),
}

impl<B: Backend> AnyTexture<B> {
    pub(crate) fn live(&self) -> Arc<TextureObject<B>> {
        match self {
            Self::Static(texture) => texture.live(),
            Self::StaticArray(texture) => texture.live(),
            Self::Dynamic(texture) => texture.live(),
            Self::Render(texture) => texture.live(),
        }
    }
}

macro_rules! any_texture_from {
    ($name:ident => $variant:ident) => {
        impl<B: Backend> From<&$name<B>> for AnyTexture<B> {
            fn from(texture: &$name<B>) -> Self {
                Self::$variant(texture.clone())
            }
        }
    };
}

any_texture_from!(StaticTexture => Static);
any_texture_from!(StaticArrayTexture => StaticArray);
any_texture_from!(DynamicTexture => Dynamic);
any_texture_from!(RenderTexture => Render);
