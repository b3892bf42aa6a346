//! Shader compilation, blob caching and interface reflection
//!
//! GLSL is translated to SPIR-V with naga. The emitted words, together with
//! the backend's pipeline cache data, form a [`ShaderBlobs`] set that can be
//! stored by the caller and handed back later to skip compilation.
//!
//! Both pipeline creation paths reflect the final SPIR-V, so a pipeline built
//! from source and one rebuilt from its blobs expose the same interface.

use naga::back::spv;
use naga::front::{glsl, spv as spv_in};
use naga::valid::{Capabilities, ValidationFlags, Validator};

use crate::error::{GfxError, GfxResult};
use crate::graphics::ShaderStage;

/// SPIR-V magic number, first word of every module
pub const SPIRV_MAGIC: u32 = 0x0723_0203;

const BLOB_MAGIC: &[u8; 4] = b"GFXB";
const BLOB_VERSION: u32 = 1;

/// GLSL sources for a vertex/fragment pair
#[derive(Debug, Clone, Copy)]
pub struct ShaderSource<'a> {
    /// Vertex stage source
    pub vertex: &'a str,
    /// Fragment stage source
    pub fragment: &'a str,
}

impl<'a> ShaderSource<'a> {
    /// Pair vertex and fragment sources
    pub const fn new(vertex: &'a str, fragment: &'a str) -> Self {
        Self { vertex, fragment }
    }
}

/// Reusable intermediate output of pipeline creation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShaderBlobs {
    /// Vertex stage SPIR-V
    pub vertex: Vec<u32>,
    /// Fragment stage SPIR-V
    pub fragment: Vec<u32>,
    /// Backend pipeline cache data
    pub pipeline: Vec<u8>,
}

impl ShaderBlobs {
    /// Whether the stage blobs are missing, meaning compilation is required
    pub fn is_empty(&self) -> bool {
        self.vertex.is_empty() || self.fragment.is_empty()
    }

    /// Serialize into a single byte buffer for storage
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(
            16 + (self.vertex.len() + self.fragment.len()) * 4 + self.pipeline.len(),
        );
        out.extend_from_slice(BLOB_MAGIC);
        out.extend_from_slice(&BLOB_VERSION.to_le_bytes());
        for section in [
            bytemuck::cast_slice::<u32, u8>(&self.vertex),
            bytemuck::cast_slice::<u32, u8>(&self.fragment),
            self.pipeline.as_slice(),
        ] {
            out.extend_from_slice(&(section.len() as u64).to_le_bytes());
            out.extend_from_slice(section);
        }
        out
    }

    /// Parse a buffer produced by [`ShaderBlobs::to_bytes`]
    pub fn from_bytes(bytes: &[u8]) -> GfxResult<Self> {
        let mut reader = BlobReader { bytes, offset: 0 };

        if reader.take(4)? != BLOB_MAGIC {
            return Err(invalid_blob("missing blob header"));
        }
        let version = u32::from_le_bytes(reader.array()?);
        if version != BLOB_VERSION {
            return Err(invalid_blob(format!("unsupported blob version {version}")));
        }

        let vertex = words_from_bytes(reader.section()?)?;
        let fragment = words_from_bytes(reader.section()?)?;
        let pipeline = reader.section()?.to_vec();

        Ok(Self {
            vertex,
            fragment,
            pipeline,
        })
    }
}

struct BlobReader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> BlobReader<'a> {
    fn take(&mut self, len: usize) -> GfxResult<&'a [u8]> {
        let end = self
            .offset
            .checked_add(len)
            .filter(|&end| end <= self.bytes.len())
            .ok_or_else(|| invalid_blob("blob is truncated"))?;
        let slice = &self.bytes[self.offset..end];
        self.offset = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> GfxResult<[u8; N]> {
        let mut out = [0; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn section(&mut self) -> GfxResult<&'a [u8]> {
        let len = u64::from_le_bytes(self.array()?);
        let len = usize::try_from(len).map_err(|_| invalid_blob("section length overflows"))?;
        self.take(len)
    }
}

fn words_from_bytes(bytes: &[u8]) -> GfxResult<Vec<u32>> {
    if bytes.len() % 4 != 0 {
        return Err(invalid_blob("SPIR-V length is not a multiple of four"));
    }
    Ok(bytemuck::pod_collect_to_vec(bytes))
}

fn invalid_blob(reason: impl Into<String>) -> GfxError {
    GfxError::InvalidShaderBlob { reason: reason.into() }
}

/// Kind of a reflected descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ResourceKind {
    /// Uniform block
    UniformBuffer,
    /// Storage block
    StorageBuffer,
    /// Sampled image
    SampledImage,
    /// Sampler
    Sampler,
}

/// A reflected descriptor binding
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResourceBinding {
    /// Descriptor set
    pub set: u32,
    /// Binding within the set
    pub binding: u32,
    /// Descriptor kind
    pub kind: ResourceKind,
}

/// Interface of a vertex/fragment pair
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShaderReflection {
    /// Vertex input locations, sorted
    pub vertex_inputs: Vec<u32>,
    /// Descriptor bindings used by either stage, sorted and deduplicated
    pub resources: Vec<ResourceBinding>,
}

/// Compile GLSL into SPIR-V words
pub fn compile_glsl(stage: ShaderStage, source: &str) -> GfxResult<Vec<u32>> {
    let naga_stage = match stage {
        ShaderStage::Vertex => naga::ShaderStage::Vertex,
        ShaderStage::Fragment => naga::ShaderStage::Fragment,
    };

    let module = glsl::Frontend::default()
        .parse(&glsl::Options::from(naga_stage), source)
        .map_err(|e| GfxError::ShaderCompilation {
            stage,
            message: format!("{e:?}"),
        })?;

    let info = Validator::new(ValidationFlags::all(), Capabilities::all())
        .validate(&module)
        .map_err(|e| GfxError::ShaderCompilation {
            stage,
            message: format!("validation failed: {e}"),
        })?;

    let options = spv::Options {
        flags: spv::WriterFlags::LABEL_VARYINGS,
        ..spv::Options::default()
    };
    let pipeline_options = spv::PipelineOptions {
        shader_stage: naga_stage,
        entry_point: "main".to_string(),
    };

    let words = spv::write_vec(&module, &info, &options, Some(&pipeline_options)).map_err(|e| {
        GfxError::ShaderCompilation {
            stage,
            message: format!("SPIR-V generation failed: {e}"),
        }
    })?;

    log::debug!("[SHADER] Compiled {:?} stage to {} SPIR-V words", stage, words.len());
    Ok(words)
}

/// Parse a SPIR-V blob into a naga module
pub fn parse_spirv(words: &[u32]) -> GfxResult<naga::Module> {
    match words.first() {
        Some(&SPIRV_MAGIC) => {}
        Some(_) => return Err(invalid_blob("missing SPIR-V magic number")),
        None => return Err(invalid_blob("empty SPIR-V blob")),
    }

    spv_in::parse_u8_slice(bytemuck::cast_slice(words), &spv_in::Options::default())
        .map_err(|e| invalid_blob(format!("SPIR-V parse failed: {e:?}")))
}

/// Reflect the interface of a vertex/fragment SPIR-V pair
pub fn reflect_spirv(vertex: &[u32], fragment: &[u32]) -> GfxResult<ShaderReflection> {
    let vertex_module = parse_spirv(vertex)?;
    let fragment_module = parse_spirv(fragment)?;

    let mut vertex_inputs = Vec::new();
    for entry in vertex_module
        .entry_points
        .iter()
        .filter(|entry| entry.stage == naga::ShaderStage::Vertex)
    {
        for argument in &entry.function.arguments {
            collect_locations(&vertex_module, argument.binding.as_ref(), argument.ty, &mut vertex_inputs);
        }
    }
    vertex_inputs.sort_unstable();
    vertex_inputs.dedup();

    let mut resources = Vec::new();
    collect_resources(&vertex_module, &mut resources);
    collect_resources(&fragment_module, &mut resources);
    resources.sort_unstable();
    resources.dedup();

    Ok(ShaderReflection {
        vertex_inputs,
        resources,
    })
}

fn collect_locations(
    module: &naga::Module,
    binding: Option<&naga::Binding>,
    ty: naga::Handle<naga::Type>,
    out: &mut Vec<u32>,
) {
    match binding {
        Some(naga::Binding::Location { location, .. }) => out.push(*location),
        Some(naga::Binding::BuiltIn(_)) => {}
        None => {
            if let naga::TypeInner::Struct { members, .. } = &module.types[ty].inner {
                for member in members {
                    collect_locations(module, member.binding.as_ref(), member.ty, out);
                }
            }
        }
    }
}

fn collect_resources(module: &naga::Module, out: &mut Vec<ResourceBinding>) {
    for (_, global) in module.global_variables.iter() {
        let Some(binding) = &global.binding else {
            continue;
        };

        let kind = match global.space {
            naga::AddressSpace::Uniform => ResourceKind::UniformBuffer,
            naga::AddressSpace::Storage { .. } => ResourceKind::StorageBuffer,
            naga::AddressSpace::Handle => match module.types[global.ty].inner {
                naga::TypeInner::Sampler { .. } => ResourceKind::Sampler,
                _ => ResourceKind::SampledImage,
            },
            _ => continue,
        };

        out.push(ResourceBinding {
            set: binding.group,
            binding: binding.binding,
            kind,
        });
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const VERTEX_SOURCE: &str = r#"#version 450
layout(location = 0) in vec3 in_position;
layout(location = 1) in vec4 in_color;

layout(set = 0, binding = 0) uniform Transform {
    mat4 mvp;
} transform;

layout(location = 0) out vec4 v_color;

void main() {
    v_color = in_color;
    gl_Position = transform.mvp * vec4(in_position, 1.0);
}
"#;

    pub(crate) const FRAGMENT_SOURCE: &str = r#"#version 450
layout(location = 0) in vec4 v_color;
layout(location = 0) out vec4 out_color;

void main() {
    out_color = v_color;
}
"#;

    /// GLSL compiles into SPIR-V that starts with the magic number
    #[test]
    fn test_compile_glsl_emits_spirv() {
        let words = compile_glsl(ShaderStage::Vertex, VERTEX_SOURCE).unwrap();
        assert_eq!(words[0], SPIRV_MAGIC);
    }

    /// Broken source reports the failing stage
    #[test]
    fn test_compile_error_names_stage() {
        let err = compile_glsl(ShaderStage::Fragment, "#version 450\nvoid main() { oops }").unwrap_err();
        assert!(matches!(
            err,
            GfxError::ShaderCompilation {
                stage: ShaderStage::Fragment,
                ..
            }
        ));
    }

    /// Reflection finds vertex inputs and the uniform block
    #[test]
    fn test_reflect_interface() {
        let vertex = compile_glsl(ShaderStage::Vertex, VERTEX_SOURCE).unwrap();
        let fragment = compile_glsl(ShaderStage::Fragment, FRAGMENT_SOURCE).unwrap();
        let reflection = reflect_spirv(&vertex, &fragment).unwrap();

        assert_eq!(reflection.vertex_inputs, vec![0, 1]);
        assert_eq!(
            reflection.resources,
            vec![ResourceBinding {
                set: 0,
                binding: 0,
                kind: ResourceKind::UniformBuffer,
            }]
        );
    }

    /// Blobs without the SPIR-V magic number are rejected
    #[test]
    fn test_rejects_garbage_blob() {
        assert!(matches!(
            parse_spirv(&[1, 2, 3]),
            Err(GfxError::InvalidShaderBlob { .. })
        ));
        assert!(parse_spirv(&[]).is_err());
    }

    /// Serialized blobs parse back and truncation is detected
    #[test]
    fn test_blob_bytes() {
        let blobs = ShaderBlobs {
            vertex: vec![SPIRV_MAGIC, 7, 9],
            fragment: vec![SPIRV_MAGIC, 1],
            pipeline: vec![1, 2, 3, 4, 5],
        };
        let bytes = blobs.to_bytes();
        assert_eq!(ShaderBlobs::from_bytes(&bytes).unwrap(), blobs);
        assert!(ShaderBlobs::from_bytes(&bytes[..bytes.len() - 1]).is_err());
        assert!(ShaderBlobs::from_bytes(b"nope").is_err());
    }
}
