//! The unit of one transaction

use std::fmt;
use std::sync::Arc;

use crate::backend::Backend;
use crate::graphics::resources::{BindingObject, BufferObject, PipelineObject, TextureObject, VertexFormatObject};

/// Objects created by one `commit_transaction` call
///
/// While a transaction runs, the batch is staged privately inside the calling
/// frame. Once committed it is owned by the registry until its token is
/// released. Fields are declared so that dependents drop before the objects
/// they reference.
pub struct GraphicsData<B: Backend> {
    bindings: Vec<Arc<BindingObject<B>>>,
    pipelines: Vec<Arc<PipelineObject<B>>>,
    vertex_formats: Vec<Arc<VertexFormatObject<B>>>,
    textures: Vec<Arc<TextureObject<B>>>,
    buffers: Vec<Arc<BufferObject<B>>>,
}

/// Number of objects in a batch, per kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResourceCounts {
    /// Static and dynamic buffers
    pub buffers: usize,
    /// Every texture variant
    pub textures: usize,
    /// Vertex formats
    pub vertex_formats: usize,
    /// Shader pipelines
    pub pipelines: usize,
    /// Shader data bindings
    pub bindings: usize,
}

impl ResourceCounts {
    /// Objects of every kind
    pub const fn total(&self) -> usize {
        self.buffers + self.textures + self.vertex_formats + self.pipelines + self.bindings
    }
}

impl<B: Backend> GraphicsData<B> {
    pub(crate) fn new() -> Self {
        Self {
            bindings: Vec::new(),
            pipelines: Vec::new(),
            vertex_formats: Vec::new(),
            textures: Vec::new(),
            buffers: Vec::new(),
        }
    }

    pub(crate) fn push_buffer(&mut self, object: Arc<BufferObject<B>>) {
        self.buffers.push(object);
    }

    pub(crate) fn push_texture(&mut self, object: Arc<TextureObject<B>>) {
        self.textures.push(object);
    }

    pub(crate) fn push_vertex_format(&mut self, object: Arc<VertexFormatObject<B>>) {
        self.vertex_formats.push(object);
    }

    pub(crate) fn push_pipeline(&mut self, object: Arc<PipelineObject<B>>) {
        self.pipelines.push(object);
    }

    pub(crate) fn push_binding(&mut self, object: Arc<BindingObject<B>>) {
        self.bindings.push(object);
    }

    /// Object counts
    pub fn counts(&self) -> ResourceCounts {
        ResourceCounts {
            buffers: self.buffers.len(),
            textures: self.textures.len(),
            vertex_formats: self.vertex_formats.len(),
            pipelines: self.pipelines.len(),
            bindings: self.bindings.len(),
        }
    }

    /// Whether the batch holds nothing
    pub fn is_empty(&self) -> bool {
        self.counts().total() == 0
    }
}

impl<B: Backend> fmt::Debug for GraphicsData<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphicsData").field("counts", &self.counts()).finish()
    }
}
