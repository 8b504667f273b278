use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Largest accepted `capacity_bits` (16M cached objects).
pub const MAX_CAPACITY_BITS: u32 = 24;

/// Configuration of an [`ObjectCache`](crate::ObjectCache).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// The cache holds `1 << capacity_bits` objects.
    pub capacity_bits: u32,
    /// Evict a cached handle when a hold on it fails for a reason other
    /// than a maintenance conflict.
    pub evict_on_failure: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity_bits: 16,
            evict_on_failure: true,
        }
    }
}

impl CacheConfig {
    /// A configuration holding `1 << bits` objects.
    pub fn with_capacity_bits(bits: u32) -> Self {
        Self {
            capacity_bits: bits,
            ..Default::default()
        }
    }

    pub fn capacity(&self) -> usize {
        1usize << self.capacity_bits
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=MAX_CAPACITY_BITS).contains(&self.capacity_bits) {
            return Err(ConfigError::Invalid(format!(
                "capacity_bits must be within 1..={MAX_CAPACITY_BITS}, got {}",
                self.capacity_bits
            )));
        }
        Ok(())
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: CacheConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }
}
