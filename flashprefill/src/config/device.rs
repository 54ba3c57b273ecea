use serde::{Deserialize, Serialize};

use super::ConfigError;
use crate::{DeviceCapability, EnvVar};

pub const DEFAULT_TILE_MEMORY_BUDGET: usize = 1 << 20;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Hardware generation used to pick tile sizes. `None` selects the
    /// conservative default configuration.
    pub capability: Option<DeviceCapability>,
    pub legacy_toolchain: bool,
    /// Worker threads; `None` lets the pool size itself.
    pub num_threads: Option<usize>,
    /// Fast memory available to one tile, in bytes.
    pub tile_memory_budget: usize,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            capability: None,
            legacy_toolchain: false,
            num_threads: None,
            tile_memory_budget: DEFAULT_TILE_MEMORY_BUDGET,
        }
    }
}

impl DeviceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if EnvVar::DeviceCapability.is_set() {
            config.capability = Some(EnvVar::DeviceCapability.value().parse()?);
        }
        config.legacy_toolchain = EnvVar::LegacyToolchain.is_enabled();
        if EnvVar::NumThreads.is_set() {
            let value = EnvVar::NumThreads.value();
            let num_threads = value.trim().parse::<usize>().map_err(|_| ConfigError::InvalidEnvValue {
                key: EnvVar::NumThreads.key(),
                value: value.clone(),
            })?;
            config.num_threads = Some(num_threads);
        }
        Ok(config)
    }

    pub fn with_capability(
        mut self,
        capability: DeviceCapability,
    ) -> Self {
        self.capability = Some(capability);
        self
    }

    pub fn with_num_threads(
        mut self,
        num_threads: usize,
    ) -> Self {
        self.num_threads = Some(num_threads);
        self
    }

    pub fn with_tile_memory_budget(
        mut self,
        tile_memory_budget: usize,
    ) -> Self {
        self.tile_memory_budget = tile_memory_budget;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_config_from_json() {
        let config: DeviceConfig = serde_json::from_str(
            r#"
            {
                "capability": "8.6",
                "num_threads": 4
            }
        "#,
        )
        .unwrap();

        assert_eq!(
            config,
            DeviceConfig {
                capability: Some(DeviceCapability::new(8, 6)),
                legacy_toolchain: false,
                num_threads: Some(4),
                tile_memory_budget: DEFAULT_TILE_MEMORY_BUDGET,
            }
        );
    }

    #[test]
    fn test_invalid_capability_is_rejected() {
        let result = serde_json::from_str::<DeviceConfig>(r#"{ "capability": "ampere" }"#);
        assert!(result.is_err());
    }
}
