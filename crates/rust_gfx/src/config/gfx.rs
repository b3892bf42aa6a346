//! Graphics configuration
//!
//! `GfxConfig` selects the backend at startup and carries the limits the
//! resource factory and presentation surfaces are built with.

use serde::{Deserialize, Serialize};

use super::{Config, ConfigError};

/// Backend selected at startup. Backends are never mixed at run time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Deterministic in-process device used for tests and tooling
    Headless,
    /// Vulkan device through `ash`
    #[default]
    Vulkan,
}

/// Slots available in the fixed shader binding layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BindingLimits {
    /// Uniform buffer slots, bound at descriptor bindings `0..uniform_slots`
    pub uniform_slots: u32,
    /// Texture slots, bound directly after the uniform slots
    pub texture_slots: u32,
}

impl Default for BindingLimits {
    fn default() -> Self {
        Self {
            uniform_slots: 8,
            texture_slots: 8,
        }
    }
}

/// How the headless queue retires submitted work
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionMode {
    /// Every submission completes as soon as it is made
    #[default]
    Immediate,
    /// Submissions stay in flight until completed explicitly
    Manual,
}

/// Headless backend settings
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HeadlessConfig {
    /// Queue completion behaviour
    pub completion: CompletionMode,
    /// Number of acquisitions a replacement swap chain takes to become ready
    pub resize_latency_frames: u32,
    /// Fold vertex formats into data bindings instead of requiring one per binding
    pub fold_vertex_format: bool,
}

/// Vulkan backend settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VulkanConfig {
    /// Enable validation layers; `None` enables them in debug builds only
    pub enable_validation: Option<bool>,
    /// Descriptor sets allocated from each descriptor pool
    pub descriptor_sets_per_pool: u32,
    /// Upper bound on descriptor pools before allocation reports exhaustion
    pub max_descriptor_pools: u32,
}

impl Default for VulkanConfig {
    fn default() -> Self {
        Self {
            enable_validation: None,
            descriptor_sets_per_pool: 256,
            max_descriptor_pools: 16,
        }
    }
}

impl VulkanConfig {
    /// Resolve the validation setting for the current build profile
    pub fn validation_enabled(&self) -> bool {
        self.enable_validation.unwrap_or(cfg!(debug_assertions))
    }
}

/// Top-level configuration for the graphics subsystem
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GfxConfig {
    /// Application name reported to the driver
    pub application_name: String,
    /// Backend used for the lifetime of the process
    pub backend: BackendKind,
    /// Presentable buffers per swap chain (2 or 3)
    pub swap_chain_buffers: u32,
    /// Frames the render thread may record ahead of the device
    pub frames_in_flight: usize,
    /// Samples per texel of render textures and pipelines; a power of two.
    /// Vulkan lowers it to the highest count the device supports.
    pub draw_samples: u32,
    /// `env_logger` filter applied by `foundation::logging::init_with_filter`
    pub log_filter: String,
    /// Fixed binding layout shared by every pipeline
    pub binding_limits: BindingLimits,
    /// Vulkan specific settings
    pub vulkan: VulkanConfig,
    /// Headless specific settings
    pub headless: HeadlessConfig,
}

impl Default for GfxConfig {
    fn default() -> Self {
        Self {
            application_name: "rust_gfx".to_string(),
            backend: BackendKind::default(),
            swap_chain_buffers: 2,
            frames_in_flight: 2,
            draw_samples: 1,
            log_filter: "info".to_string(),
            binding_limits: BindingLimits::default(),
            vulkan: VulkanConfig::default(),
            headless: HeadlessConfig::default(),
        }
    }
}

impl Config for GfxConfig {}

impl GfxConfig {
    /// Headless configuration, handy for tests and offline tools
    pub fn headless() -> Self {
        Self {
            backend: BackendKind::Headless,
            ..Self::default()
        }
    }

    /// Set application name
    pub fn with_application_name(mut self, name: impl Into<String>) -> Self {
        self.application_name = name.into();
        self
    }

    /// Set backend
    pub fn with_backend(mut self, backend: BackendKind) -> Self {
        self.backend = backend;
        self
    }

    /// Set presentable buffer count
    pub fn with_swap_chain_buffers(mut self, buffers: u32) -> Self {
        self.swap_chain_buffers = buffers;
        self
    }

    /// Set maximum frames in flight
    pub fn with_frames_in_flight(mut self, frames: usize) -> Self {
        self.frames_in_flight = frames;
        self
    }

    /// Set the multisample count of render textures
    pub fn with_draw_samples(mut self, samples: u32) -> Self {
        self.draw_samples = samples;
        self
    }

    /// Set binding layout limits
    pub fn with_binding_limits(mut self, limits: BindingLimits) -> Self {
        self.binding_limits = limits;
        self
    }

    /// Set headless queue completion mode
    pub fn with_completion(mut self, completion: CompletionMode) -> Self {
        self.headless.completion = completion;
        self
    }

    /// Set how many acquisitions a replacement swap chain needs before it is ready
    pub fn with_resize_latency(mut self, frames: u32) -> Self {
        self.headless.resize_latency_frames = frames;
        self
    }

    /// Let data bindings omit their vertex format on the headless backend
    pub fn with_folded_vertex_format(mut self, fold: bool) -> Self {
        self.headless.fold_vertex_format = fold;
        self
    }

    /// Set validation layer usage
    pub fn with_validation(mut self, enabled: bool) -> Self {
        self.vulkan.enable_validation = Some(enabled);
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(2..=3).contains(&self.swap_chain_buffers) {
            return Err(ConfigError::Invalid(format!(
                "swap_chain_buffers must be 2 or 3, got {}",
                self.swap_chain_buffers
            )));
        }

        if self.frames_in_flight == 0 {
            return Err(ConfigError::Invalid("frames_in_flight must be at least 1".to_string()));
        }

        if !self.draw_samples.is_power_of_two() || self.draw_samples > 64 {
            return Err(ConfigError::Invalid(format!(
                "draw_samples must be a power of two up to 64, got {}",
                self.draw_samples
            )));
        }

        if self.binding_limits.uniform_slots == 0 || self.binding_limits.texture_slots == 0 {
            return Err(ConfigError::Invalid("binding limits must be non-zero".to_string()));
        }

        if self.backend == BackendKind::Vulkan
            && (self.vulkan.descriptor_sets_per_pool == 0 || self.vulkan.max_descriptor_pools == 0)
        {
            return Err(ConfigError::Invalid("descriptor pool sizes must be non-zero".to_string()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Default configuration passes validation
    #[test]
    fn test_default_config_is_valid() {
        assert!(GfxConfig::default().validate().is_ok());
        assert!(GfxConfig::headless().validate().is_ok());
    }

    /// Buffer counts outside 2..=3 are rejected
    #[test]
    fn test_rejects_bad_buffer_count() {
        let config = GfxConfig::headless().with_swap_chain_buffers(4);
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let config = GfxConfig::headless().with_swap_chain_buffers(1);
        assert!(config.validate().is_err());
    }

    /// Zero frames in flight is rejected
    #[test]
    fn test_rejects_zero_frames_in_flight() {
        let config = GfxConfig::headless().with_frames_in_flight(0);
        assert!(config.validate().is_err());
    }

    /// Sample counts must be powers of two the APIs can express
    #[test]
    fn test_rejects_bad_draw_samples() {
        for samples in [0, 3, 128] {
            let config = GfxConfig::headless().with_draw_samples(samples);
            assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))), "{samples}");
        }
        for samples in [1, 4, 64] {
            assert!(GfxConfig::headless().with_draw_samples(samples).validate().is_ok());
        }
    }

    /// TOML text with missing fields falls back to defaults
    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: GfxConfig = toml::from_str(
            r#"
            backend = "headless"
            swap_chain_buffers = 3

            [headless]
            completion = "manual"
            "#,
        )
        .unwrap();

        assert_eq!(config.backend, BackendKind::Headless);
        assert_eq!(config.swap_chain_buffers, 3);
        assert_eq!(config.headless.completion, CompletionMode::Manual);
        assert_eq!(config.binding_limits, BindingLimits::default());
        assert_eq!(config.frames_in_flight, 2);
        assert_eq!(config.draw_samples, 1);
    }

    /// Saving and loading through both file formats preserves the values
    #[test]
    fn test_save_and_load_files() {
        let dir = std::env::temp_dir();
        let config = GfxConfig::headless()
            .with_application_name("config-test")
            .with_swap_chain_buffers(3)
            .with_resize_latency(2);

        for name in ["rust_gfx_config_test.toml", "rust_gfx_config_test.ron"] {
            let path = dir.join(name);
            config.save_to_file(&path).unwrap();
            let loaded = GfxConfig::load_from_file(&path).unwrap();
            assert_eq!(loaded, config);
            let _ = std::fs::remove_file(&path);
        }
    }

    /// Unknown extensions are reported as unsupported
    #[test]
    fn test_unsupported_extension() {
        let err = GfxConfig::default().save_to_file("config.json").unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedFormat(_)));
    }
}
