//! # Rust Gfx
//!
//! Transactional GPU resource management and double-buffered presentation.
//!
//! ## Features
//!
//! - **Atomic batches**: buffers, textures, pipelines and bindings are created
//!   together in one transaction and become visible only if all succeed
//! - **Token ownership**: every batch is owned by the token its commit returns;
//!   releasing the token is the only way to destroy it
//! - **Deferred destruction**: released objects are freed only after the device
//!   has finished every frame that used them
//! - **Non-blocking resize**: each window keeps two swap-chain slots so a
//!   replacement is built while the old one keeps presenting
//! - **Backends**: Vulkan through `ash`, plus a deterministic headless device
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rust_gfx::prelude::*;
//!
//! fn main() -> Result<(), GfxError> {
//!     let config = GfxConfig::headless();
//!     let backend = HeadlessBackend::new(&config);
//!     let factory = DataFactory::new(backend, &config);
//!
//!     let token = factory.commit_transaction(|ctx| {
//!         ctx.new_static_buffer_typed(BufferUse::Vertex, &[0.0f32; 9])?;
//!         Ok(())
//!     })?;
//!
//!     token.release();
//!     factory.collect_retired();
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod foundation;
pub mod graphics;
pub mod present;

#[cfg(feature = "glfw")]
pub mod window;

pub use error::{GfxError, GfxResult};

/// Common imports for library users
pub mod prelude {
    pub use crate::{
        backend::{Backend, HeadlessBackend, VulkanBackend},
        config::{BackendKind, BindingLimits, Config, GfxConfig},
        error::{GfxError, GfxResult},
        graphics::{
            BufferUse, CommandQueue, Context, DataFactory, Extent2D, GraphicsDataToken, Rect2D,
            ShaderDataBindingDesc, ShaderStages, TextureFormat, VertexElementDescriptor,
        },
        present::{ResizeNotifier, SurfaceState, WindowId, WindowSurface},
    };
}
