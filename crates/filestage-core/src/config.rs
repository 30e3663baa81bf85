//! Engine configuration.

use derive_builder::Builder;
use serde::{Deserialize, Serialize};

/// Buffer size for streamed copies, extraction and hashing.
pub const DEFAULT_CHUNK_SIZE: usize = 4096;

/// Configuration shared by every process run.
#[derive(Debug, Clone, Builder, Serialize, Deserialize, PartialEq, Eq)]
#[builder(setter(into), build_fn(validate = "Self::validate"))]
pub struct EngineConfig {
    /// Size of each buffered I/O chunk in bytes.
    #[builder(default = "DEFAULT_CHUNK_SIZE")]
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Follow symbolic links while enumerating.
    #[builder(default = "false")]
    #[serde(default)]
    pub follow_symlinks: bool,

    /// Skip an item without asking after this many retries (None = always ask).
    #[builder(default)]
    #[serde(default)]
    pub max_retries: Option<u32>,
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

impl EngineConfigBuilder {
    fn validate(&self) -> Result<(), String> {
        if self.chunk_size == Some(0) {
            return Err("Chunk size must be greater than zero".to_string());
        }
        Ok(())
    }
}

impl EngineConfig {
    /// Create a new config builder.
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            follow_symlinks: false,
            max_retries: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = EngineConfig::builder()
            .chunk_size(8192usize)
            .follow_symlinks(true)
            .max_retries(Some(3u32))
            .build()
            .unwrap();

        assert_eq!(config.chunk_size, 8192);
        assert!(config.follow_symlinks);
        assert_eq!(config.max_retries, Some(3));
    }

    #[test]
    fn test_config_rejects_zero_chunk() {
        assert!(EngineConfig::builder().chunk_size(0usize).build().is_err());
    }

    #[test]
    fn test_config_defaults() {
        let config = EngineConfig::builder().build().unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.chunk_size, 4096);
    }
}
