//! Engine-level configuration, loaded via `serde`+`ron`. Centralizes
//! the literal defaults used throughout the engine (1s fence timeout,
//! 4096-slot pools, 64/256 MiB block sizes) instead of scattering them
//! as magic numbers through the RG layer.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors loading an [`EngineConfig`] from disk.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// Path that failed to read.
        path: String,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },
    /// The RON body failed to parse.
    #[error("failed to parse config: {0}")]
    Parse(#[from] ron::de::SpannedError),
}

/// Window creation parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowConfig {
    /// Initial window width.
    pub width: u32,
    /// Initial window height.
    pub height: u32,
    /// Window title.
    pub title: String,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self { width: 1280, height: 720, title: "rg_core".to_string() }
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Window creation parameters.
    pub window: WindowConfig,
    /// Whether to request FIFO present mode (vsync) over mailbox/immediate.
    pub vsync: bool,
    /// Whether to enable `VK_LAYER_KHRONOS_validation` and the debug
    /// messenger.
    pub enable_validation: bool,
    /// Depth format used by swapchains unless overridden.
    pub default_depth_format_name: String,
    /// Timeout, in nanoseconds, for fence waits in `present` and
    /// one-shot uploads (1 second by default).
    pub fence_timeout_ns: u64,
    /// Slot count for each of the three bindless arrays (4096 by
    /// default).
    pub bindless_slots_per_array: u32,
    /// Default host-visible memory block size, in bytes (64 MiB).
    pub host_visible_block_size: u64,
    /// Default device-local memory block size, in bytes (256 MiB).
    pub device_local_block_size: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            window: WindowConfig::default(),
            vsync: true,
            enable_validation: cfg!(debug_assertions),
            default_depth_format_name: "D32_SFLOAT".to_string(),
            fence_timeout_ns: 1_000_000_000,
            bindless_slots_per_array: 4096,
            host_visible_block_size: 64 * 1024 * 1024,
            device_local_block_size: 256 * 1024 * 1024,
        }
    }
}

impl EngineConfig {
    /// Load a config from a RON file, falling back to built-in defaults
    /// for any field the file omits (RON's struct-update-adjacent
    /// `Option` fields aren't used here; a missing file is instead
    /// treated as "use `Default::default()`" by the caller).
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io { path: path.display().to_string(), source })?;
        let config: EngineConfig = ron::from_str(&text)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = EngineConfig::default();
        assert_eq!(config.fence_timeout_ns, 1_000_000_000);
        assert_eq!(config.bindless_slots_per_array, 4096);
        assert_eq!(config.host_visible_block_size, 64 * 1024 * 1024);
        assert_eq!(config.device_local_block_size, 256 * 1024 * 1024);
    }

    #[test]
    fn round_trips_through_ron() {
        let config = EngineConfig::default();
        let text = ron::to_string(&config).unwrap();
        let parsed: EngineConfig = ron::from_str(&text).unwrap();
        assert_eq!(parsed.window.width, config.window.width);
        assert_eq!(parsed.bindless_slots_per_array, config.bindless_slots_per_array);
    }
}
