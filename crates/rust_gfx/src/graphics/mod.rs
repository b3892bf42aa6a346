//! Transactional resource management
//!
//! Resources are created in atomic batches through [`DataFactory`], owned by
//! the [`GraphicsDataToken`] each commit returns, and destroyed in two
//! phases once the device has finished with them. [`CommandQueue`] records
//! and submits frames that use them.

pub mod commands;
pub mod context;
pub mod data;
pub mod factory;
pub mod registry;
pub mod resources;
pub mod retirement;
pub mod shader;
pub mod types;

mod factory_tests;

pub use commands::CommandQueue;
pub use context::{Context, ShaderDataBindingDesc};
pub use data::{GraphicsData, ResourceCounts};
pub use factory::{DataFactory, GraphicsDataToken};
pub use registry::{DataKey, LocalRegistry, LockedRegistry, Registry};
pub use resources::{
    AnyBuffer, AnyTexture, BindingSummary, DynamicBuffer, DynamicTexture, RenderTexture, ShaderDataBinding,
    ShaderPipeline, StaticArrayTexture, StaticBuffer, StaticTexture, VertexFormat,
};
pub use retirement::RetirementQueue;
pub use shader::{ResourceBinding, ResourceKind, ShaderBlobs, ShaderReflection, ShaderSource};
pub use types::*;
