use std::{fmt, str::FromStr};

use ndarray::ArrayView3;
use serde::{Deserialize, Serialize};

use crate::{config::ConfigError, device::TileConfiguration};

/// Memory layout of the key/value tensors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum KvLayout {
    /// `[tokens, kv_heads, head_dim]`
    Shd,
    /// `[kv_heads, tokens, head_dim]`
    #[default]
    Hsd,
}

impl KvLayout {
    pub fn tag(&self) -> &'static str {
        match self {
            KvLayout::Shd => "shd",
            KvLayout::Hsd => "hsd",
        }
    }

    /// Reinterprets a key/value view as `[tokens, kv_heads, head_dim]`.
    pub fn to_token_major<'a, T>(
        &self,
        view: ArrayView3<'a, T>,
    ) -> ArrayView3<'a, T> {
        match self {
            KvLayout::Shd => view,
            KvLayout::Hsd => view.permuted_axes([1, 0, 2]),
        }
    }
}

impl fmt::Display for KvLayout {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for KvLayout {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "shd" => Ok(KvLayout::Shd),
            "hsd" => Ok(KvLayout::Hsd),
            other => Err(ConfigError::UnsupportedLayout(other.to_string())),
        }
    }
}

impl TryFrom<String> for KvLayout {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<KvLayout> for String {
    fn from(layout: KvLayout) -> Self {
        layout.tag().to_string()
    }
}

/// Per-call scalars of the prefill attention.
///
/// Negative `window_size` and `logit_softcapping` disable the feature, matching
/// the convention used by model configurations.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttentionOptions {
    /// Defaults to `1 / sqrt(head_dim_k)`.
    pub sm_scale: Option<f32>,
    pub window_size: i32,
    pub logit_softcapping: f32,
    pub causal: bool,
    pub kv_layout: KvLayout,
    /// Defaults to the longest query in the batch.
    pub max_q_seqlen: Option<usize>,
    /// Bypasses the tuning table.
    pub tile_configuration: Option<TileConfiguration>,
}

impl Default for AttentionOptions {
    fn default() -> Self {
        Self {
            sm_scale: None,
            window_size: -1,
            logit_softcapping: -1.0,
            causal: true,
            kv_layout: KvLayout::default(),
            max_q_seqlen: None,
            tile_configuration: None,
        }
    }
}

impl AttentionOptions {
    pub fn with_causal(
        mut self,
        causal: bool,
    ) -> Self {
        self.causal = causal;
        self
    }

    pub fn with_window_size(
        mut self,
        window_size: i32,
    ) -> Self {
        self.window_size = window_size;
        self
    }

    pub fn with_logit_softcapping(
        mut self,
        logit_softcapping: f32,
    ) -> Self {
        self.logit_softcapping = logit_softcapping;
        self
    }

    pub fn with_sm_scale(
        mut self,
        sm_scale: f32,
    ) -> Self {
        self.sm_scale = Some(sm_scale);
        self
    }

    pub fn with_kv_layout(
        mut self,
        kv_layout: KvLayout,
    ) -> Self {
        self.kv_layout = kv_layout;
        self
    }

    pub fn with_max_q_seqlen(
        mut self,
        max_q_seqlen: usize,
    ) -> Self {
        self.max_q_seqlen = Some(max_q_seqlen);
        self
    }

    pub fn with_tile_configuration(
        mut self,
        tile_configuration: TileConfiguration,
    ) -> Self {
        self.tile_configuration = Some(tile_configuration);
        self
    }

    pub fn scale_for(
        &self,
        head_dim_k: usize,
    ) -> f32 {
        self.sm_scale.unwrap_or_else(|| 1.0 / (head_dim_k as f32).sqrt())
    }
}

#[cfg(test)]
mod tests {
    use ndarray::Array3;

    use super::*;

    #[test]
    fn test_layout_tags() {
        assert_eq!("shd".parse::<KvLayout>().unwrap(), KvLayout::Shd);
        assert_eq!("hsd".parse::<KvLayout>().unwrap(), KvLayout::Hsd);
        assert_eq!("nhd".parse::<KvLayout>(), Err(ConfigError::UnsupportedLayout("nhd".to_string())));
    }

    #[test]
    fn test_hsd_view_is_token_major() {
        let hsd = Array3::from_shape_fn((2, 5, 3), |(h, s, d)| (h * 100 + s * 10 + d) as f32);
        let view = KvLayout::Hsd.to_token_major(hsd.view());
        assert_eq!(view.dim(), (5, 2, 3));
        assert_eq!(view[[4, 1, 2]], 142.0);
    }

    #[test]
    fn test_options_defaults_from_json() {
        let options: AttentionOptions = serde_json::from_str(r#"{ "window_size": 128, "kv_layout": "shd" }"#).unwrap();
        assert_eq!(options.window_size, 128);
        assert_eq!(options.kv_layout, KvLayout::Shd);
        assert!(options.causal);
        assert_eq!(options.logit_softcapping, -1.0);
        assert_eq!(options.scale_for(64), 0.125);
    }
}
