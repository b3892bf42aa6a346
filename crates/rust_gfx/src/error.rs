//! Error types shared by every backend
//!
//! Only environmental failures are represented here. Contract violations
//! (bad descriptors, dead handles, releasing a batch twice) panic instead.

use ash::vk;
use thiserror::Error;

use crate::backend::vulkan::VulkanError;
use crate::config::ConfigError;
use crate::graphics::ShaderStage;

/// Recoverable graphics errors
#[derive(Error, Debug)]
pub enum GfxError {
    /// Device or host memory could not satisfy an allocation
    #[error("Out of memory: {requested} bytes")]
    OutOfMemory {
        /// Number of bytes that were requested
        requested: usize,
    },

    /// A fixed-size pool (descriptors, queries, ...) has no room left
    #[error("Resource exhausted: {reason}")]
    ResourceExhausted {
        /// Which pool ran out
        reason: String,
    },

    /// GLSL source failed to parse, validate or translate
    #[error("Shader compilation failed ({stage:?}): {message}")]
    ShaderCompilation {
        /// Stage being compiled
        stage: ShaderStage,
        /// Compiler diagnostics
        message: String,
    },

    /// A cached SPIR-V or pipeline blob could not be used
    #[error("Invalid shader blob: {reason}")]
    InvalidShaderBlob {
        /// Why the blob was rejected
        reason: String,
    },

    /// The presentation surface changed underneath the swap chain
    #[error("Surface is out of date")]
    SurfaceOutOfDate,

    /// The device stopped responding
    #[error("Device lost")]
    DeviceLost,

    /// Backend-specific failure without a dedicated variant
    #[error("Backend error: {0}")]
    Backend(String),

    /// Vulkan failure that does not map onto a portable variant
    #[error(transparent)]
    Vulkan(VulkanError),

    /// Configuration could not be loaded or was invalid
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Result type for graphics operations
pub type GfxResult<T> = Result<T, GfxError>;

impl From<VulkanError> for GfxError {
    fn from(err: VulkanError) -> Self {
        match err {
            VulkanError::Api(code) => Self::from(code),
            VulkanError::OutOfMemory { requested } => Self::OutOfMemory { requested },
            other => Self::Vulkan(other),
        }
    }
}

impl From<vk::Result> for GfxError {
    fn from(code: vk::Result) -> Self {
        match code {
            vk::Result::ERROR_OUT_OF_DEVICE_MEMORY | vk::Result::ERROR_OUT_OF_HOST_MEMORY => {
                Self::OutOfMemory { requested: 0 }
            }
            vk::Result::ERROR_OUT_OF_POOL_MEMORY | vk::Result::ERROR_FRAGMENTED_POOL => Self::ResourceExhausted {
                reason: format!("descriptor pool: {code:?}"),
            },
            vk::Result::ERROR_OUT_OF_DATE_KHR | vk::Result::SUBOPTIMAL_KHR | vk::Result::ERROR_SURFACE_LOST_KHR => {
                Self::SurfaceOutOfDate
            }
            vk::Result::ERROR_DEVICE_LOST => Self::DeviceLost,
            other => Self::Vulkan(VulkanError::Api(other)),
        }
    }
}

impl GfxError {
    /// Whether the error only invalidates the current surface, not the device
    pub fn is_surface_out_of_date(&self) -> bool {
        matches!(self, Self::SurfaceOutOfDate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Vulkan memory codes surface as portable out-of-memory errors
    #[test]
    fn test_vulkan_memory_errors_map_to_out_of_memory() {
        let err = GfxError::from(VulkanError::Api(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY));
        assert!(matches!(err, GfxError::OutOfMemory { .. }));

        let err = GfxError::from(VulkanError::OutOfMemory { requested: 64 });
        assert!(matches!(err, GfxError::OutOfMemory { requested: 64 }));
    }

    /// Pool exhaustion and surface loss get their own variants
    #[test]
    fn test_pool_and_surface_codes() {
        assert!(matches!(
            GfxError::from(vk::Result::ERROR_OUT_OF_POOL_MEMORY),
            GfxError::ResourceExhausted { .. }
        ));
        assert!(GfxError::from(vk::Result::ERROR_OUT_OF_DATE_KHR).is_surface_out_of_date());
        assert!(matches!(GfxError::from(vk::Result::ERROR_DEVICE_LOST), GfxError::DeviceLost));
    }

    /// Other codes stay wrapped as Vulkan errors
    #[test]
    fn test_other_codes_stay_vulkan() {
        let err = GfxError::from(vk::Result::ERROR_INITIALIZATION_FAILED);
        assert!(matches!(err, GfxError::Vulkan(VulkanError::Api(_))));
    }
}
