//! Descriptor layout, pooled descriptor allocation and shader data bindings

use std::sync::{Arc, Mutex, PoisonError};

use ash::vk;

use super::context::DeviceContext;
use super::{VulkanError, VulkanResult};
use crate::config::BindingLimits;

/// Stages every slot of the fixed layout is visible to
const ALL_STAGES: vk::ShaderStageFlags =
    vk::ShaderStageFlags::from_raw(vk::ShaderStageFlags::VERTEX.as_raw() | vk::ShaderStageFlags::FRAGMENT.as_raw());

/// Create the fixed descriptor set layout
///
/// Uniform buffers occupy bindings `0..U`, sampled images `U..U+T`, and the
/// immutable sampler sits at `U+T`.
pub fn create_set_layout(
    device: &ash::Device,
    limits: BindingLimits,
    sampler: vk::Sampler,
) -> VulkanResult<vk::DescriptorSetLayout> {
    let samplers = [sampler];
    let mut bindings = Vec::with_capacity((limits.uniform_slots + limits.texture_slots + 1) as usize);

    for binding in 0..limits.uniform_slots {
        bindings.push(
            vk::DescriptorSetLayoutBinding::builder()
                .binding(binding)
                .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                .descriptor_count(1)
                .stage_flags(ALL_STAGES)
                .build(),
        );
    }
    for slot in 0..limits.texture_slots {
        bindings.push(
            vk::DescriptorSetLayoutBinding::builder()
                .binding(limits.uniform_slots + slot)
                .descriptor_type(vk::DescriptorType::SAMPLED_IMAGE)
                .descriptor_count(1)
                .stage_flags(ALL_STAGES)
                .build(),
        );
    }
    bindings.push(
        vk::DescriptorSetLayoutBinding::builder()
            .binding(limits.uniform_slots + limits.texture_slots)
            .descriptor_type(vk::DescriptorType::SAMPLER)
            .descriptor_count(1)
            .stage_flags(ALL_STAGES)
            .immutable_samplers(&samplers)
            .build(),
    );

    let layout_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&bindings);
    unsafe { device.create_descriptor_set_layout(&layout_info, None) }.map_err(VulkanError::Api)
}

struct DescriptorPool {
    pool: vk::DescriptorPool,
    live: u32,
}

/// Grows descriptor pools on demand up to a configured bound
pub struct DescriptorAllocator {
    pools: Mutex<Vec<DescriptorPool>>,
    sets_per_pool: u32,
    max_pools: u32,
    device: Arc<DeviceContext>,
}

impl DescriptorAllocator {
    /// Create an allocator; no pool exists until the first allocation
    pub fn new(device: &Arc<DeviceContext>, sets_per_pool: u32, max_pools: u32) -> Self {
        Self {
            pools: Mutex::new(Vec::new()),
            sets_per_pool: sets_per_pool.max(1),
            max_pools: max_pools.max(1),
            device: Arc::clone(device),
        }
    }

    fn create_pool(&self) -> VulkanResult<vk::DescriptorPool> {
        let limits = self.device.limits;
        let sets = self.sets_per_pool;
        let pool_sizes = [
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::UNIFORM_BUFFER,
                descriptor_count: sets * limits.uniform_slots.max(1),
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::SAMPLED_IMAGE,
                descriptor_count: sets * limits.texture_slots.max(1),
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::SAMPLER,
                descriptor_count: sets,
            },
        ];

        let pool_info = vk::DescriptorPoolCreateInfo::builder()
            .flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET)
            .max_sets(sets)
            .pool_sizes(&pool_sizes);

        unsafe { self.device.device.create_descriptor_pool(&pool_info, None) }.map_err(VulkanError::Api)
    }

    fn try_allocate(&self, pool: vk::DescriptorPool) -> Result<vk::DescriptorSet, vk::Result> {
        let layouts = [self.device.set_layout];
        let alloc_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(pool)
            .set_layouts(&layouts);
        unsafe { self.device.device.allocate_descriptor_sets(&alloc_info) }.map(|sets| sets[0])
    }

    /// Allocate one set of the fixed layout
    ///
    /// Returns the set and the index of the pool it came from. Fails with
    /// `ERROR_OUT_OF_POOL_MEMORY` once every permitted pool is full.
    pub fn allocate(&self) -> VulkanResult<(vk::DescriptorSet, usize)> {
        let mut pools = self.pools.lock().unwrap_or_else(PoisonError::into_inner);

        for (index, pool) in pools.iter_mut().enumerate() {
            if pool.live >= self.sets_per_pool {
                continue;
            }
            match self.try_allocate(pool.pool) {
                Ok(set) => {
                    pool.live += 1;
                    return Ok((set, index));
                }
                Err(vk::Result::ERROR_OUT_OF_POOL_MEMORY | vk::Result::ERROR_FRAGMENTED_POOL) => {}
                Err(err) => return Err(VulkanError::Api(err)),
            }
        }

        if pools.len() as u32 >= self.max_pools {
            log::warn!("[VULKAN] All {} descriptor pools are full", self.max_pools);
            return Err(VulkanError::Api(vk::Result::ERROR_OUT_OF_POOL_MEMORY));
        }

        let pool = self.create_pool()?;
        pools.push(DescriptorPool { pool, live: 0 });
        let index = pools.len() - 1;
        log::debug!("[VULKAN] Created descriptor pool {index}");

        let set = self.try_allocate(pool).map_err(VulkanError::Api)?;
        pools[index].live += 1;
        Ok((set, index))
    }

    /// Return a set to its pool
    pub fn free(&self, set: vk::DescriptorSet, pool_index: usize) {
        let mut pools = self.pools.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(pool) = pools.get_mut(pool_index) {
            unsafe {
                let _ = self.device.device.free_descriptor_sets(pool.pool, &[set]);
            }
            pool.live = pool.live.saturating_sub(1);
        }
    }
}

impl Drop for DescriptorAllocator {
    fn drop(&mut self) {
        let pools = self.pools.get_mut().unwrap_or_else(PoisonError::into_inner);
        for pool in pools.drain(..) {
            unsafe {
                self.device.device.destroy_descriptor_pool(pool.pool, None);
            }
        }
    }
}

/// Vertex, instance or index stream of a binding
#[derive(Debug, Clone, Copy)]
pub struct Stream {
    /// Source buffer
    pub buffer: vk::Buffer,
    /// Elements the buffer holds
    pub capacity: u32,
}

/// Pipeline, descriptor set and streams bound together for drawing
pub struct VulkanBinding {
    /// Pipeline drawn with
    pub pipeline: vk::Pipeline,
    /// Descriptor set of the fixed layout
    pub set: vk::DescriptorSet,
    /// Per-vertex stream
    pub vertices: Option<Stream>,
    /// Per-instance stream
    pub instances: Option<Stream>,
    /// 32-bit index stream
    pub indices: Option<Stream>,
    /// Whether the pipeline reads per-vertex attributes
    pub needs_vertices: bool,
    /// Whether the pipeline reads per-instance attributes
    pub needs_instances: bool,
    pool_index: usize,
    allocator: Arc<DescriptorAllocator>,
}

impl VulkanBinding {
    /// Wrap an allocated set
    pub fn new(allocator: &Arc<DescriptorAllocator>, set: vk::DescriptorSet, pool_index: usize, pipeline: vk::Pipeline) -> Self {
        Self {
            pipeline,
            set,
            vertices: None,
            instances: None,
            indices: None,
            needs_vertices: false,
            needs_instances: false,
            pool_index,
            allocator: Arc::clone(allocator),
        }
    }
}

impl Drop for VulkanBinding {
    fn drop(&mut self) {
        self.allocator.free(self.set, self.pool_index);
    }
}

/// Collects descriptor writes for one set
pub struct DescriptorSetWriter {
    set: vk::DescriptorSet,
    buffers: Vec<(u32, vk::DescriptorBufferInfo)>,
    images: Vec<(u32, vk::DescriptorImageInfo)>,
}

impl DescriptorSetWriter {
    /// Start writing `set`
    pub fn new(set: vk::DescriptorSet) -> Self {
        Self {
            set,
            buffers: Vec::new(),
            images: Vec::new(),
        }
    }

    /// Bind a uniform buffer range
    pub fn uniform(mut self, binding: u32, buffer: vk::Buffer, offset: u64, range: u64) -> Self {
        self.buffers.push((
            binding,
            vk::DescriptorBufferInfo {
                buffer,
                offset,
                range,
            },
        ));
        self
    }

    /// Bind a shader-readable image view
    pub fn sampled_image(mut self, binding: u32, view: vk::ImageView) -> Self {
        self.images.push((
            binding,
            vk::DescriptorImageInfo {
                sampler: vk::Sampler::null(),
                image_view: view,
                image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            },
        ));
        self
    }

    /// Apply every write
    pub fn update(self, device: &ash::Device) {
        let mut writes = Vec::with_capacity(self.buffers.len() + self.images.len());
        for (binding, info) in &self.buffers {
            writes.push(
                vk::WriteDescriptorSet::builder()
                    .dst_set(self.set)
                    .dst_binding(*binding)
                    .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                    .buffer_info(std::slice::from_ref(info))
                    .build(),
            );
        }
        for (binding, info) in &self.images {
            writes.push(
                vk::WriteDescriptorSet::builder()
                    .dst_set(self.set)
                    .dst_binding(*binding)
                    .descriptor_type(vk::DescriptorType::SAMPLED_IMAGE)
                    .image_info(std::slice::from_ref(info))
                    .build(),
            );
        }

        if !writes.is_empty() {
            unsafe { device.update_descriptor_sets(&writes, &[]) };
        }
    }
}
