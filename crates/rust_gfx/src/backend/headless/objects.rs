//! Headless device objects and live-object accounting
//!
//! Every object carries a [`Tracked`] guard that bumps a per-kind counter on
//! creation and drops it again on destruction, so tests can assert that a
//! batch really freed what it created.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::backend::{BufferDesc, TextureDesc};
use crate::graphics::{Extent2D, VertexLayout};

/// Kinds of device object counted by the headless backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    /// Buffers
    Buffer,
    /// Textures of every variant
    Texture,
    /// Vertex formats
    VertexFormat,
    /// Pipelines
    Pipeline,
    /// Data bindings
    Binding,
    /// Swap chains
    SwapChain,
    /// Presentable images owned by swap chains
    SwapChainImage,
}

impl ObjectKind {
    const COUNT: usize = 7;

    const fn index(self) -> usize {
        self as usize
    }
}

/// Live objects per kind
#[derive(Debug, Default)]
pub(crate) struct LiveCounters {
    counts: [AtomicUsize; ObjectKind::COUNT],
}

impl LiveCounters {
    pub(crate) fn get(&self, kind: ObjectKind) -> usize {
        self.counts[kind.index()].load(Ordering::Acquire)
    }
}

/// Snapshot of live headless objects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LiveCounts {
    /// Buffers
    pub buffers: usize,
    /// Textures
    pub textures: usize,
    /// Vertex formats
    pub vertex_formats: usize,
    /// Pipelines
    pub pipelines: usize,
    /// Data bindings
    pub bindings: usize,
    /// Swap chains
    pub swap_chains: usize,
    /// Presentable images
    pub swap_chain_images: usize,
}

impl LiveCounts {
    pub(crate) fn from_counters(counters: &LiveCounters) -> Self {
        Self {
            buffers: counters.get(ObjectKind::Buffer),
            textures: counters.get(ObjectKind::Texture),
            vertex_formats: counters.get(ObjectKind::VertexFormat),
            pipelines: counters.get(ObjectKind::Pipeline),
            bindings: counters.get(ObjectKind::Binding),
            swap_chains: counters.get(ObjectKind::SwapChain),
            swap_chain_images: counters.get(ObjectKind::SwapChainImage),
        }
    }

    /// Resource objects, excluding presentation objects
    pub const fn resources(&self) -> usize {
        self.buffers + self.textures + self.vertex_formats + self.pipelines + self.bindings
    }
}

/// Counter guard held by every headless object
#[derive(Debug)]
pub(crate) struct Tracked {
    counters: Arc<LiveCounters>,
    kind: ObjectKind,
    amount: usize,
}

impl Tracked {
    pub(crate) fn new(counters: &Arc<LiveCounters>, kind: ObjectKind, amount: usize) -> Self {
        counters.counts[kind.index()].fetch_add(amount, Ordering::AcqRel);
        Self {
            counters: Arc::clone(counters),
            kind,
            amount,
        }
    }
}

impl Drop for Tracked {
    fn drop(&mut self) {
        self.counters.counts[self.kind.index()].fetch_sub(self.amount, Ordering::AcqRel);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Buffer backed by host memory
#[derive(Debug)]
pub struct HeadlessBuffer {
    pub(crate) desc: BufferDesc,
    contents: Mutex<Vec<u8>>,
    _tracked: Tracked,
}

impl HeadlessBuffer {
    pub(crate) fn new(counters: &Arc<LiveCounters>, desc: BufferDesc, contents: Option<&[u8]>) -> Self {
        let mut bytes = vec![0; desc.size];
        if let Some(data) = contents {
            bytes[..data.len()].copy_from_slice(data);
        }
        Self {
            desc,
            contents: Mutex::new(bytes),
            _tracked: Tracked::new(counters, ObjectKind::Buffer, 1),
        }
    }

    pub(crate) fn write(&self, data: &[u8]) {
        lock(&self.contents)[..data.len()].copy_from_slice(data);
    }

    /// Copy of the buffer contents
    pub fn contents(&self) -> Vec<u8> {
        lock(&self.contents).clone()
    }
}

/// Texture backed by host memory
#[derive(Debug)]
pub struct HeadlessTexture {
    pub(crate) desc: TextureDesc,
    contents: Mutex<Vec<u8>>,
    _tracked: Tracked,
}

impl HeadlessTexture {
    pub(crate) fn new(counters: &Arc<LiveCounters>, desc: TextureDesc, contents: Option<&[u8]>) -> Self {
        let bytes = match contents {
            Some(data) => data.to_vec(),
            None => vec![0; desc.data_size()],
        };
        Self {
            desc,
            contents: Mutex::new(bytes),
            _tracked: Tracked::new(counters, ObjectKind::Texture, 1),
        }
    }

    pub(crate) fn write(&self, data: &[u8]) {
        *lock(&self.contents) = data.to_vec();
    }

    /// Copy of the texel data
    pub fn contents(&self) -> Vec<u8> {
        lock(&self.contents).clone()
    }

    /// Samples per texel
    pub fn samples(&self) -> u32 {
        self.desc.samples()
    }
}

/// Vertex format
#[derive(Debug)]
pub struct HeadlessVertexFormat {
    pub(crate) layout: VertexLayout,
    _tracked: Tracked,
}

impl HeadlessVertexFormat {
    pub(crate) fn new(counters: &Arc<LiveCounters>, layout: VertexLayout) -> Self {
        Self {
            layout,
            _tracked: Tracked::new(counters, ObjectKind::VertexFormat, 1),
        }
    }
}

/// Pipeline, identified by a hash of its shader words
#[derive(Debug)]
pub struct HeadlessPipeline {
    pub(crate) shader_hash: u64,
    samples: u32,
    _tracked: Tracked,
}

impl HeadlessPipeline {
    pub(crate) fn new(counters: &Arc<LiveCounters>, shader_hash: u64, samples: u32) -> Self {
        Self {
            shader_hash,
            samples,
            _tracked: Tracked::new(counters, ObjectKind::Pipeline, 1),
        }
    }

    /// Rasterization samples per pixel
    pub fn samples(&self) -> u32 {
        self.samples
    }
}

/// Data binding with the element capacity of each stream
#[derive(Debug)]
pub struct HeadlessBinding {
    pub(crate) shader_hash: u64,
    pub(crate) samples: u32,
    pub(crate) needs_vertices: bool,
    pub(crate) needs_instances: bool,
    pub(crate) vertex_capacity: Option<u32>,
    pub(crate) instance_capacity: Option<u32>,
    pub(crate) index_capacity: Option<u32>,
    _tracked: Tracked,
}

impl HeadlessBinding {
    pub(crate) fn new(
        counters: &Arc<LiveCounters>,
        pipeline: &HeadlessPipeline,
        layout: &VertexLayout,
        vertex_bytes: Option<usize>,
        instance_bytes: Option<usize>,
        index_bytes: Option<usize>,
    ) -> Self {
        let capacity = |bytes: Option<usize>, stride: u32| {
            bytes.map(|bytes| if stride == 0 { u32::MAX } else { (bytes / stride as usize) as u32 })
        };
        Self {
            shader_hash: pipeline.shader_hash,
            samples: pipeline.samples,
            needs_vertices: layout.vertex_stride > 0,
            needs_instances: layout.has_instance_stream(),
            vertex_capacity: capacity(vertex_bytes, layout.vertex_stride),
            instance_capacity: capacity(instance_bytes, layout.instance_stride),
            index_capacity: capacity(index_bytes, 4),
            _tracked: Tracked::new(counters, ObjectKind::Binding, 1),
        }
    }
}

/// Window surface stand-in
#[derive(Debug)]
pub struct HeadlessSurface {
    pub(crate) id: u64,
}

/// Simulated swap chain
#[derive(Debug)]
pub struct HeadlessSwapChain {
    pub(crate) surface_id: u64,
    pub(crate) extent: Extent2D,
    pub(crate) buffer_count: u32,
    /// Polls left before the chain can present
    pub(crate) pending_polls: u32,
    /// Surface epoch the chain was built in
    pub(crate) epoch: u64,
    pub(crate) acquired: Option<u32>,
    _images: Tracked,
    _tracked: Tracked,
}

impl HeadlessSwapChain {
    pub(crate) fn new(
        counters: &Arc<LiveCounters>,
        surface_id: u64,
        extent: Extent2D,
        buffer_count: u32,
        pending_polls: u32,
        epoch: u64,
    ) -> Self {
        Self {
            surface_id,
            extent,
            buffer_count,
            pending_polls,
            epoch,
            acquired: None,
            _images: Tracked::new(counters, ObjectKind::SwapChainImage, buffer_count as usize),
            _tracked: Tracked::new(counters, ObjectKind::SwapChain, 1),
        }
    }
}
