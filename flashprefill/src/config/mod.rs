mod attention;
mod device;
mod error;

pub use attention::AttentionConfig;
pub use device::{DEFAULT_TILE_MEMORY_BUDGET, DeviceConfig};
pub use error::ConfigError;
