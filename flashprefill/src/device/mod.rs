mod capability;
mod tuning;

pub use capability::DeviceCapability;
pub use tuning::{KernelTuning, TileConfiguration, select_tile_configuration};
