use serde::{Deserialize, Serialize};

use super::ConfigError;
use crate::kernel::AttentionOptions;

fn default_is_causal() -> bool {
    true
}

/// Attention scalars resolved from a model descriptor.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct AttentionConfig {
    pub num_heads: usize,
    pub num_kv_heads: usize,
    pub head_dim: usize,
    #[serde(default)]
    pub head_dim_v: Option<usize>,
    #[serde(default)]
    pub sliding_window: Option<usize>,
    #[serde(default)]
    pub logit_soft_cap: Option<f32>,
    #[serde(default = "default_is_causal")]
    pub is_causal: bool,
    #[serde(default)]
    pub scale: Option<f32>,
}

impl AttentionConfig {
    pub fn value_head_dim(&self) -> usize {
        self.head_dim_v.unwrap_or(self.head_dim)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_heads == 0 || self.num_kv_heads == 0 {
            return Err(ConfigError::ZeroHeads);
        }
        if self.head_dim == 0 || self.value_head_dim() == 0 {
            return Err(ConfigError::ZeroHeadDim);
        }
        if self.num_heads % self.num_kv_heads != 0 {
            return Err(ConfigError::IndivisibleHeads {
                num_heads: self.num_heads,
                num_kv_heads: self.num_kv_heads,
            });
        }
        Ok(())
    }

    pub fn options(&self) -> AttentionOptions {
        AttentionOptions {
            sm_scale: self.scale,
            window_size: self.sliding_window.map_or(-1, |window| i32::try_from(window).unwrap_or(i32::MAX)),
            logit_softcapping: self.logit_soft_cap.unwrap_or(-1.0),
            causal: self.is_causal,
            ..AttentionOptions::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attention_config() {
        let config_str = r#"
            {
                "num_heads": 32,
                "num_kv_heads": 8,
                "head_dim": 128,
                "sliding_window": 4096,
                "logit_soft_cap": 50.0
            }
        "#;

        let config: AttentionConfig = serde_json::from_str(config_str).unwrap();
        let ground_truth_config = AttentionConfig {
            num_heads: 32,
            num_kv_heads: 8,
            head_dim: 128,
            head_dim_v: None,
            sliding_window: Some(4096),
            logit_soft_cap: Some(50.0),
            is_causal: true,
            scale: None,
        };
        assert_eq!(config, ground_truth_config);
        assert_eq!(config.value_head_dim(), 128);

        let options = config.options();
        assert_eq!(options.window_size, 4096);
        assert_eq!(options.logit_softcapping, 50.0);
        assert!(options.causal);
    }

    #[test]
    fn test_validate() {
        let mut config: AttentionConfig =
            serde_json::from_str(r#"{ "num_heads": 6, "num_kv_heads": 4, "head_dim": 64 }"#).unwrap();
        assert_eq!(
            config.validate(),
            Err(ConfigError::IndivisibleHeads {
                num_heads: 6,
                num_kv_heads: 4,
            })
        );

        config.num_kv_heads = 2;
        assert_eq!(config.validate(), Ok(()));

        config.head_dim_v = Some(0);
        assert_eq!(config.validate(), Err(ConfigError::ZeroHeadDim));
    }

    #[test]
    fn test_disabled_features_map_to_sentinels() {
        let config: AttentionConfig =
            serde_json::from_str(r#"{ "num_heads": 2, "num_kv_heads": 2, "head_dim": 64, "is_causal": false }"#)
                .unwrap();
        let options = config.options();
        assert_eq!(options.window_size, -1);
        assert_eq!(options.logit_softcapping, -1.0);
        assert!(!options.causal);
    }
}
