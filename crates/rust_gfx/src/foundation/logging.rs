//! Logging utilities and structured logging support
//!
//! Every subsystem logs through the `log` facade with a bracketed prefix
//! (`[TRANSACTION]`, `[SWAPCHAIN]`, `[VULKAN]`, ...) so output can be
//! filtered per subsystem with `RUST_LOG` style filters.

pub use log::{debug, info, warn, error, trace};

/// Initialize the logging system from the `RUST_LOG` environment variable
pub fn init() {
    env_logger::init();
}

/// Initialize the logging system with an explicit filter string
///
/// The filter uses the `env_logger` syntax, e.g. `"info,rust_gfx::present=debug"`.
/// Directives in `RUST_LOG` are applied on top of it. Calling this more than
/// once is harmless; later calls are ignored.
pub fn init_with_filter(filter: &str) {
    let _ = filter_builder(filter)
        .parse_env(env_logger::Env::default())
        .try_init();
}

fn filter_builder(filter: &str) -> env_logger::Builder {
    let mut builder = env_logger::Builder::new();
    builder.parse_filters(filter).format_timestamp_millis();
    builder
}

/// Install a test logger that writes through the test harness capture
#[cfg(test)]
pub fn init_for_tests() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug"))
        .is_test(true)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use log::LevelFilter;

    /// The configured filter sets the maximum level
    #[test]
    fn test_filter_from_config() {
        assert_eq!(filter_builder("warn").build().filter(), LevelFilter::Warn);
        assert_eq!(
            filter_builder("info,rust_gfx::present=trace").build().filter(),
            LevelFilter::Trace
        );
    }
}
