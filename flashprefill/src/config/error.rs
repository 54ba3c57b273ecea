use thiserror::Error;

use crate::DataType;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Unsupported KV layout: {0}")]
    UnsupportedLayout(String),
    #[error("Query head dim {query} does not match key head dim {key}")]
    HeadDimMismatch {
        query: usize,
        key: usize,
    },
    #[error("Value head dim {value} does not match output head dim {output}")]
    ValueHeadDimMismatch {
        value: usize,
        output: usize,
    },
    #[error("Keys have {keys} kv heads but values have {values}")]
    KvHeadCountMismatch {
        keys: usize,
        values: usize,
    },
    #[error("Number of heads {num_heads} is not divisible by number of kv heads {num_kv_heads}")]
    IndivisibleHeads {
        num_heads: usize,
        num_kv_heads: usize,
    },
    #[error("Head counts must be non-zero")]
    ZeroHeads,
    #[error("Head dims must be non-zero")]
    ZeroHeadDim,
    #[error("Tile sizes must be non-zero, got {block_m}x{block_n}")]
    ZeroTileSize {
        block_m: usize,
        block_n: usize,
    },
    #[error("Operator built for {expected} cannot run on {actual} tensors")]
    DataTypeMismatch {
        expected: DataType,
        actual: DataType,
    },
    #[error("Invalid device capability: {0}")]
    InvalidCapability(String),
    #[error("Invalid value {value:?} for {key}")]
    InvalidEnvValue {
        key: &'static str,
        value: String,
    },
}
