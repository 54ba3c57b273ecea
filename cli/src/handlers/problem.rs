use std::{error::Error, fs};

use clap::{Args, ValueEnum};
use flashprefill::{
    ArrayElement, AttentionConfig, ConfigError, DataType, DeviceCapability, DeviceConfig,
    kernel::{AttentionOptions, BatchDescriptor, KvLayout},
};
use ndarray::Array3;
use rand::{Rng, SeedableRng, rngs::StdRng};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Precision {
    F32,
    F16,
    Bf16,
}

impl From<Precision> for DataType {
    fn from(precision: Precision) -> Self {
        match precision {
            Precision::F32 => DataType::F32,
            Precision::F16 => DataType::F16,
            Precision::Bf16 => DataType::BF16,
        }
    }
}

/// Shape and masking of a synthetic ragged batch.
#[derive(Debug, Clone, Args)]
pub struct ProblemArgs {
    /// Comma-separated query lengths, one per sequence
    #[arg(long, value_delimiter = ',', default_values_t = vec![512usize, 128, 33])]
    pub seqlens: Vec<usize>,
    /// Cached tokens preceding the queries of every sequence
    #[arg(long, default_value_t = 0)]
    pub history: usize,
    #[arg(long, default_value_t = 8)]
    pub num_heads: usize,
    #[arg(long, default_value_t = 2)]
    pub num_kv_heads: usize,
    #[arg(long, default_value_t = 128)]
    pub head_dim: usize,
    /// Defaults to --head-dim
    #[arg(long)]
    pub head_dim_v: Option<usize>,
    #[arg(long)]
    pub window: Option<usize>,
    #[arg(long)]
    pub softcap: Option<f32>,
    #[arg(long)]
    pub non_causal: bool,
    #[arg(long, value_enum, default_value_t = Precision::F32)]
    pub dtype: Precision,
    /// Attention config JSON; replaces heads, dims, window and softcap
    #[arg(long)]
    pub config: Option<String>,
    #[arg(long, default_value_t = 0)]
    pub seed: u64,
}

pub struct SyntheticBatch<T> {
    pub queries: Array3<T>,
    pub keys: Array3<T>,
    pub values: Array3<T>,
    pub batch: BatchDescriptor,
}

impl ProblemArgs {
    pub fn data_type(&self) -> DataType {
        self.dtype.into()
    }

    pub fn attention_config(&self) -> Result<AttentionConfig, Box<dyn Error>> {
        let config: AttentionConfig = match &self.config {
            Some(path) => serde_json::from_str(&fs::read_to_string(path)?)?,
            None => AttentionConfig {
                num_heads: self.num_heads,
                num_kv_heads: self.num_kv_heads,
                head_dim: self.head_dim,
                head_dim_v: self.head_dim_v,
                sliding_window: self.window,
                logit_soft_cap: self.softcap,
                is_causal: !self.non_causal,
                scale: None,
            },
        };
        config.validate()?;
        Ok(config)
    }

    pub fn options(
        &self,
        config: &AttentionConfig,
    ) -> AttentionOptions {
        config.options().with_kv_layout(KvLayout::Shd)
    }

    pub fn total_tokens(&self) -> usize {
        self.seqlens.iter().sum()
    }

    pub fn synthesize<T: ArrayElement>(
        &self,
        config: &AttentionConfig,
    ) -> Result<SyntheticBatch<T>, Box<dyn Error>> {
        let kv_seqlens = self.seqlens.iter().map(|seqlen| seqlen + self.history).collect::<Vec<_>>();
        let batch = BatchDescriptor::packed(&self.seqlens, &kv_seqlens)?;
        let q_tokens = batch.total_q_tokens();
        let kv_tokens = kv_seqlens.iter().sum();

        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut random = |shape: (usize, usize, usize)| {
            Array3::from_shape_simple_fn(shape, || T::from_f32(rng.random_range(-1.0f32..1.0f32)))
        };
        Ok(SyntheticBatch {
            queries: random((q_tokens, config.num_heads, config.head_dim)),
            keys: random((kv_tokens, config.num_kv_heads, config.head_dim)),
            values: random((kv_tokens, config.num_kv_heads, config.value_head_dim())),
            batch,
        })
    }
}

/// Device the engine is tuned for.
#[derive(Debug, Clone, Args)]
pub struct DeviceArgs {
    /// Hardware generation used to pick tile sizes, e.g. 8.6
    #[arg(long)]
    pub capability: Option<DeviceCapability>,
    #[arg(long)]
    pub legacy_toolchain: bool,
    /// Worker threads, all cores by default
    #[arg(long)]
    pub threads: Option<usize>,
}

impl DeviceArgs {
    /// Environment settings with the command-line flags applied on top.
    pub fn device_config(&self) -> Result<DeviceConfig, ConfigError> {
        let mut config = DeviceConfig::from_env()?;
        if let Some(capability) = self.capability {
            config.capability = Some(capability);
        }
        config.legacy_toolchain |= self.legacy_toolchain;
        if let Some(threads) = self.threads {
            config.num_threads = Some(threads);
        }
        Ok(config)
    }
}
