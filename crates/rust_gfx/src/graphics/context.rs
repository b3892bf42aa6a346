//! Per-transaction resource builder
//!
//! A [`Context`] only exists inside the closure passed to
//! [`DataFactory::commit_transaction`](super::DataFactory::commit_transaction).
//! It borrows the batch under construction, so resources can only be created
//! while a transaction is running, and the borrow checker keeps the closure
//! from smuggling the context out.
//!
//! Descriptor mistakes (wrong payload length, zero sizes, slot overflow,
//! dead handles) are contract violations and panic. Device failures are
//! returned as [`GfxError`](crate::error::GfxError) and abandon the whole
//! transaction.

use std::ops::Range;
use std::sync::Arc;

use bytemuck::Pod;

use crate::backend::{Backend, BindingDesc, BufferDesc, PipelineDesc, TextureDesc, TextureKind, UniformDesc};
use crate::config::BindingLimits;
use crate::error::GfxResult;
use crate::graphics::data::GraphicsData;
use crate::graphics::resources::{
    AnyBuffer, AnyTexture, BindingObject, BufferObject, DynamicBuffer, DynamicTexture, PipelineObject, RenderTexture,
    ShaderDataBinding, ShaderPipeline, StaticArrayTexture, StaticBuffer, StaticTexture, TextureObject, VertexFormat,
    VertexFormatObject,
};
use crate::graphics::shader::{self, ResourceKind, ShaderBlobs, ShaderReflection, ShaderSource};
use crate::graphics::{
    max_mip_levels, BufferUse, Extent2D, PipelineState, Platform, ShaderStage, ShaderStages, TextureFormat,
    VertexElementDescriptor, VertexLayout,
};

/// One uniform slot of a binding description
pub struct UniformSlot<B: Backend> {
    buffer: AnyBuffer<B>,
    stages: ShaderStages,
    range: Option<Range<usize>>,
}

/// Inputs of a shader data binding
///
/// ```ignore
/// let desc = ShaderDataBindingDesc::new(&pipeline)
///     .vertex_buffer(&vertices)
///     .index_buffer(&indices)
///     .uniform(&transform, ShaderStages::VERTEX)
///     .texture(&albedo);
/// ```
pub struct ShaderDataBindingDesc<B: Backend> {
    pipeline: ShaderPipeline<B>,
    vertex_format: Option<VertexFormat<B>>,
    vertex_buffer: Option<AnyBuffer<B>>,
    instance_buffer: Option<AnyBuffer<B>>,
    index_buffer: Option<AnyBuffer<B>>,
    uniforms: Vec<UniformSlot<B>>,
    textures: Vec<AnyTexture<B>>,
}

impl<B: Backend> ShaderDataBindingDesc<B> {
    /// Start a description for `pipeline`
    pub fn new(pipeline: &ShaderPipeline<B>) -> Self {
        Self {
            pipeline: pipeline.clone(),
            vertex_format: None,
            vertex_buffer: None,
            instance_buffer: None,
            index_buffer: None,
            uniforms: Vec::new(),
            textures: Vec::new(),
        }
    }

    /// Attach an explicit vertex format
    pub fn vertex_format(mut self, format: &VertexFormat<B>) -> Self {
        self.vertex_format = Some(format.clone());
        self
    }

    /// Per-vertex stream
    pub fn vertex_buffer(mut self, buffer: impl Into<AnyBuffer<B>>) -> Self {
        self.vertex_buffer = Some(buffer.into());
        self
    }

    /// Per-instance stream
    pub fn instance_buffer(mut self, buffer: impl Into<AnyBuffer<B>>) -> Self {
        self.instance_buffer = Some(buffer.into());
        self
    }

    /// Index stream of 32-bit indices
    pub fn index_buffer(mut self, buffer: impl Into<AnyBuffer<B>>) -> Self {
        self.index_buffer = Some(buffer.into());
        self
    }

    /// Bind a whole uniform buffer to the next slot
    pub fn uniform(mut self, buffer: impl Into<AnyBuffer<B>>, stages: ShaderStages) -> Self {
        self.uniforms.push(UniformSlot {
            buffer: buffer.into(),
            stages,
            range: None,
        });
        self
    }

    /// Bind part of a uniform buffer to the next slot
    pub fn uniform_range(mut self, buffer: impl Into<AnyBuffer<B>>, stages: ShaderStages, range: Range<usize>) -> Self {
        self.uniforms.push(UniformSlot {
            buffer: buffer.into(),
            stages,
            range: Some(range),
        });
        self
    }

    /// Bind a texture to the next slot
    pub fn texture(mut self, texture: impl Into<AnyTexture<B>>) -> Self {
        self.textures.push(texture.into());
        self
    }
}

/// Resource builder handed to transaction closures
pub struct Context<'a, B: Backend> {
    backend: &'a Arc<B>,
    data: &'a mut GraphicsData<B>,
    limits: BindingLimits,
}

impl<'a, B: Backend> Context<'a, B> {
    pub(crate) fn new(backend: &'a Arc<B>, data: &'a mut GraphicsData<B>, limits: BindingLimits) -> Self {
        Self { backend, data, limits }
    }

    /// Backend family
    pub fn platform(&self) -> Platform {
        self.backend.platform()
    }

    /// Backend name
    pub fn platform_name(&self) -> &'static str {
        self.backend.platform_name()
    }

    /// Whether data bindings need an explicit vertex format
    ///
    /// When this is false, callers can skip [`Context::new_vertex_format`]
    /// for bindings and let the pipeline's format apply.
    pub fn binding_needs_vertex_format(&self) -> bool {
        self.backend.binding_needs_vertex_format()
    }

    /// Layout limits shared by every pipeline
    pub fn binding_limits(&self) -> BindingLimits {
        self.limits
    }

    fn buffer(&mut self, desc: BufferDesc, contents: Option<&[u8]>) -> GfxResult<Arc<BufferObject<B>>> {
        let raw = self.backend.create_buffer(&desc, contents)?;
        let object = Arc::new(BufferObject {
            raw,
            desc,
            backend: Arc::clone(self.backend),
        });
        self.data.push_buffer(Arc::clone(&object));
        log::debug!(
            "[TRANSACTION] Created {} {:?} buffer of {} bytes",
            if desc.dynamic { "dynamic" } else { "static" },
            desc.usage,
            desc.size
        );
        Ok(object)
    }

    fn texture(&mut self, desc: TextureDesc, contents: Option<&[u8]>) -> GfxResult<Arc<TextureObject<B>>> {
        assert!(
            !desc.extent.is_empty(),
            "texture extent must be non-zero, got {}x{}",
            desc.extent.width,
            desc.extent.height
        );
        let raw = self.backend.create_texture(&desc, contents)?;
        let object = Arc::new(TextureObject {
            raw,
            desc,
            backend: Arc::clone(self.backend),
        });
        self.data.push_texture(Arc::clone(&object));
        log::debug!(
            "[TRANSACTION] Created {:?} texture {}x{} {:?}",
            desc.kind,
            desc.extent.width,
            desc.extent.height,
            desc.format
        );
        Ok(object)
    }

    /// Immutable buffer holding `count` elements of `stride` bytes
    ///
    /// # Panics
    /// If `stride` or `count` is zero, `stride * count` overflows or `data`
    /// is not `stride * count` bytes.
    pub fn new_static_buffer(
        &mut self,
        usage: BufferUse,
        data: &[u8],
        stride: usize,
        count: usize,
    ) -> GfxResult<StaticBuffer<B>> {
        assert!(stride > 0 && count > 0, "static buffer must have non-zero stride and count");
        assert_eq!(
            data.len(),
            buffer_size(stride, count),
            "static buffer payload must be stride * count bytes"
        );

        let desc = BufferDesc {
            usage,
            size: data.len(),
            dynamic: false,
        };
        let object = self.buffer(desc, Some(data))?;
        Ok(StaticBuffer::new(&object))
    }

    /// Immutable buffer filled from a slice of plain-old-data values
    pub fn new_static_buffer_typed<T: Pod>(&mut self, usage: BufferUse, data: &[T]) -> GfxResult<StaticBuffer<B>> {
        self.new_static_buffer(usage, bytemuck::cast_slice(data), std::mem::size_of::<T>(), data.len())
    }

    /// Buffer of `count` elements of `stride` bytes, rewritten with `load`
    ///
    /// # Panics
    /// If `stride` or `count` is zero or their product overflows.
    pub fn new_dynamic_buffer(&mut self, usage: BufferUse, stride: usize, count: usize) -> GfxResult<DynamicBuffer<B>> {
        assert!(stride > 0 && count > 0, "dynamic buffer must have non-zero stride and count");

        let desc = BufferDesc {
            usage,
            size: buffer_size(stride, count),
            dynamic: true,
        };
        let object = self.buffer(desc, None)?;
        Ok(DynamicBuffer::new(&object))
    }

    /// Immutable texture with a mip chain, level zero first in `data`
    ///
    /// # Panics
    /// If `mips` is zero or longer than the full chain, or `data` does not
    /// hold exactly every level.
    pub fn new_static_texture(
        &mut self,
        width: u32,
        height: u32,
        mips: u32,
        format: TextureFormat,
        data: &[u8],
    ) -> GfxResult<StaticTexture<B>> {
        assert!(
            mips >= 1 && mips <= max_mip_levels(width, height),
            "{mips} mip levels is out of range for a {width}x{height} texture"
        );

        let desc = TextureDesc {
            kind: TextureKind::Static { mips },
            format,
            extent: Extent2D::new(width, height),
        };
        assert_eq!(
            data.len(),
            desc.data_size(),
            "static texture payload does not match its format and mip chain"
        );

        let object = self.texture(desc, Some(data))?;
        Ok(StaticTexture::new(&object))
    }

    /// Immutable layered texture, layer zero first in `data`
    ///
    /// # Panics
    /// If `layers` is zero or `data` does not hold exactly every layer.
    pub fn new_static_array_texture(
        &mut self,
        width: u32,
        height: u32,
        layers: u32,
        format: TextureFormat,
        data: &[u8],
    ) -> GfxResult<StaticArrayTexture<B>> {
        assert!(layers >= 1, "array texture must have at least one layer");

        let desc = TextureDesc {
            kind: TextureKind::StaticArray { layers },
            format,
            extent: Extent2D::new(width, height),
        };
        assert_eq!(
            data.len(),
            desc.data_size(),
            "array texture payload does not match its format and layer count"
        );

        let object = self.texture(desc, Some(data))?;
        Ok(StaticArrayTexture::new(&object))
    }

    /// Single-level texture rewritten with `load`
    pub fn new_dynamic_texture(&mut self, width: u32, height: u32, format: TextureFormat) -> GfxResult<DynamicTexture<B>> {
        let desc = TextureDesc {
            kind: TextureKind::Dynamic,
            format,
            extent: Extent2D::new(width, height),
        };
        let object = self.texture(desc, None)?;
        Ok(DynamicTexture::new(&object))
    }

    /// Offscreen RGBA color and depth target
    ///
    /// Enabling a shader binding keeps a sampleable copy of that attachment,
    /// refreshed by `CommandQueue::resolve_bind_texture`. The attachments use
    /// the backend's draw sample count.
    ///
    /// # Panics
    /// If a depth binding is requested while the backend draws multisampled.
    pub fn new_render_texture(
        &mut self,
        width: u32,
        height: u32,
        enable_shader_color_binding: bool,
        enable_shader_depth_binding: bool,
    ) -> GfxResult<RenderTexture<B>> {
        let samples = self.backend.draw_samples();
        assert!(
            samples == 1 || !enable_shader_depth_binding,
            "depth binding is not available on render textures with {samples} samples"
        );
        let desc = TextureDesc {
            kind: TextureKind::Render {
                color_binding: enable_shader_color_binding,
                depth_binding: enable_shader_depth_binding,
                samples,
            },
            format: TextureFormat::Rgba8,
            extent: Extent2D::new(width, height),
        };
        let object = self.texture(desc, None)?;
        Ok(RenderTexture::new(&object))
    }

    /// Vertex format with consecutive locations in element order
    ///
    /// # Panics
    /// If `elements` is empty.
    pub fn new_vertex_format(&mut self, elements: &[VertexElementDescriptor]) -> GfxResult<VertexFormat<B>> {
        assert!(!elements.is_empty(), "vertex format needs at least one element");

        let layout = VertexLayout::from_elements(elements);
        let raw = self.backend.create_vertex_format(&layout)?;
        let object = Arc::new(VertexFormatObject {
            raw,
            elements: elements.to_vec(),
            layout,
            _backend: Arc::clone(self.backend),
        });
        self.data.push_vertex_format(Arc::clone(&object));
        log::debug!("[TRANSACTION] Created vertex format with {} elements", elements.len());
        Ok(VertexFormat::new(&object))
    }

    /// Pipeline compiled from GLSL
    ///
    /// With `cache` set, non-empty blobs are used as-is and compilation is
    /// skipped; empty blobs are filled with the SPIR-V and pipeline cache
    /// data so a later [`Context::new_shader_pipeline_from_blobs`] call can
    /// rebuild an identical pipeline.
    pub fn new_shader_pipeline(
        &mut self,
        source: ShaderSource<'_>,
        cache: Option<&mut ShaderBlobs>,
        vertex_format: &VertexFormat<B>,
        state: PipelineState,
    ) -> GfxResult<ShaderPipeline<B>> {
        let mut scratch = ShaderBlobs::default();
        let blobs = match cache {
            Some(blobs) => blobs,
            None => &mut scratch,
        };

        if blobs.is_empty() {
            blobs.vertex = shader::compile_glsl(ShaderStage::Vertex, source.vertex)?;
            blobs.fragment = shader::compile_glsl(ShaderStage::Fragment, source.fragment)?;
            blobs.pipeline.clear();
        } else {
            log::debug!("[TRANSACTION] Reusing cached shader blobs");
        }

        let (pipeline, pipeline_cache) =
            self.build_pipeline(&blobs.vertex, &blobs.fragment, &blobs.pipeline, vertex_format, state)?;
        blobs.pipeline = pipeline_cache;
        Ok(pipeline)
    }

    /// Pipeline rebuilt from previously emitted blobs without compiling
    pub fn new_shader_pipeline_from_blobs(
        &mut self,
        blobs: &ShaderBlobs,
        vertex_format: &VertexFormat<B>,
        state: PipelineState,
    ) -> GfxResult<ShaderPipeline<B>> {
        if blobs.is_empty() {
            return Err(crate::error::GfxError::InvalidShaderBlob {
                reason: "vertex or fragment blob is empty".to_string(),
            });
        }

        let (pipeline, _) = self.build_pipeline(&blobs.vertex, &blobs.fragment, &blobs.pipeline, vertex_format, state)?;
        Ok(pipeline)
    }

    fn build_pipeline(
        &mut self,
        vertex: &[u32],
        fragment: &[u32],
        cache: &[u8],
        vertex_format: &VertexFormat<B>,
        state: PipelineState,
    ) -> GfxResult<(ShaderPipeline<B>, Vec<u8>)> {
        let reflection = shader::reflect_spirv(vertex, fragment)?;
        let format = vertex_format.live();
        self.check_interface(&reflection, &format.layout);

        let desc = PipelineDesc {
            vertex,
            fragment,
            cache,
            vertex_format: &format.raw,
            layout: &format.layout,
            state,
        };
        let (raw, pipeline_cache) = self.backend.create_pipeline(&desc)?;

        let object = Arc::new(PipelineObject {
            raw,
            state,
            reflection,
            vertex_format: format,
            _backend: Arc::clone(self.backend),
        });
        self.data.push_pipeline(Arc::clone(&object));
        log::debug!(
            "[TRANSACTION] Created pipeline ({} vertex inputs, {} resources)",
            object.reflection.vertex_inputs.len(),
            object.reflection.resources.len()
        );
        Ok((ShaderPipeline::new(&object), pipeline_cache))
    }

    /// Check a reflected interface against the vertex layout and the fixed binding layout
    fn check_interface(&self, reflection: &ShaderReflection, layout: &VertexLayout) {
        let provided = layout.locations();
        for location in &reflection.vertex_inputs {
            assert!(
                provided.contains(location),
                "vertex shader reads location {location} which the vertex format does not provide"
            );
        }

        let uniform_end = self.limits.uniform_slots;
        let texture_end = uniform_end + self.limits.texture_slots;
        for resource in &reflection.resources {
            let expected = match resource.binding {
                b if b < uniform_end => ResourceKind::UniformBuffer,
                b if b < texture_end => ResourceKind::SampledImage,
                b if b == texture_end => ResourceKind::Sampler,
                _ => panic!("shader binding {} is outside the binding layout", resource.binding),
            };
            assert!(
                resource.set == 0 && resource.kind == expected,
                "shader resource {resource:?} does not match the binding layout (expected {expected:?} in set 0)"
            );
        }
    }

    /// Bind a pipeline to the buffers and textures a draw call reads
    ///
    /// # Panics
    /// On dead handles, buffers with the wrong usage, more slots than the
    /// layout provides, uniform ranges outside their buffer, sampling a render
    /// texture without a shader binding, or a missing vertex format on
    /// backends that need one.
    pub fn new_shader_data_binding(&mut self, desc: ShaderDataBindingDesc<B>) -> GfxResult<ShaderDataBinding<B>> {
        let pipeline = desc.pipeline.live();

        assert!(
            desc.vertex_format.is_some() || !self.backend.binding_needs_vertex_format(),
            "{} bindings need an explicit vertex format",
            self.backend.platform_name()
        );
        assert!(
            desc.uniforms.len() <= self.limits.uniform_slots as usize,
            "{} uniform slots requested, layout provides {}",
            desc.uniforms.len(),
            self.limits.uniform_slots
        );
        assert!(
            desc.textures.len() <= self.limits.texture_slots as usize,
            "{} texture slots requested, layout provides {}",
            desc.textures.len(),
            self.limits.texture_slots
        );

        let vertex_format = desc.vertex_format.as_ref().map(VertexFormat::live);
        let stream = |buffer: &Option<AnyBuffer<B>>, usage: BufferUse| {
            buffer.as_ref().map(|buffer| {
                let object = buffer.live();
                assert_eq!(object.desc.usage, usage, "buffer bound as {usage:?} was created for another use");
                object
            })
        };
        let vertex_buffer = stream(&desc.vertex_buffer, BufferUse::Vertex);
        let instance_buffer = stream(&desc.instance_buffer, BufferUse::Vertex);
        let index_buffer = stream(&desc.index_buffer, BufferUse::Index);

        let mut uniforms = Vec::with_capacity(desc.uniforms.len());
        let mut uniform_ranges = Vec::with_capacity(desc.uniforms.len());
        for slot in &desc.uniforms {
            let object = slot.buffer.live();
            assert_eq!(object.desc.usage, BufferUse::Uniform, "uniform slot bound to a non-uniform buffer");
            let range = slot.range.clone().unwrap_or(0..object.desc.size);
            assert!(
                !range.is_empty() && range.end <= object.desc.size,
                "uniform range {range:?} is outside a {} byte buffer",
                object.desc.size
            );
            uniforms.push(object);
            uniform_ranges.push((slot.stages, range));
        }

        let textures: Vec<_> = desc
            .textures
            .iter()
            .map(|texture| {
                let object = texture.live();
                if let TextureKind::Render {
                    color_binding,
                    depth_binding,
                    ..
                } = object.desc.kind
                {
                    assert!(
                        color_binding || depth_binding,
                        "render texture sampled without a shader binding enabled"
                    );
                }
                object
            })
            .collect();

        let layout = &pipeline.vertex_format.layout;
        let raw = {
            let backend_desc = BindingDesc {
                pipeline: &pipeline.raw,
                vertex_format: vertex_format.as_ref().map(|format| &format.raw),
                layout,
                vertex_buffer: vertex_buffer.as_ref().map(|b| (&b.raw, b.desc.size)),
                instance_buffer: instance_buffer.as_ref().map(|b| (&b.raw, b.desc.size)),
                index_buffer: index_buffer.as_ref().map(|b| (&b.raw, b.desc.size)),
                uniforms: uniforms
                    .iter()
                    .zip(&uniform_ranges)
                    .map(|(buffer, (stages, range))| UniformDesc {
                        buffer: &buffer.raw,
                        stages: *stages,
                        range: range.clone(),
                    })
                    .collect(),
                textures: textures.iter().map(|texture| &texture.raw).collect(),
            };
            self.backend.create_binding(&backend_desc)?
        };

        let object = Arc::new(BindingObject {
            raw,
            pipeline,
            vertex_format,
            vertex_buffer,
            instance_buffer,
            index_buffer,
            uniforms,
            textures,
            _backend: Arc::clone(self.backend),
        });
        self.data.push_binding(Arc::clone(&object));
        log::debug!(
            "[TRANSACTION] Created data binding ({} uniforms, {} textures)",
            object.uniforms.len(),
            object.textures.len()
        );
        Ok(ShaderDataBinding::new(&object))
    }
}

fn buffer_size(stride: usize, count: usize) -> usize {
    stride
        .checked_mul(count)
        .unwrap_or_else(|| panic!("buffer of {count} elements of {stride} bytes overflows the address space"))
}
