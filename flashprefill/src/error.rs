use thiserror::Error;

use crate::{ConfigError, TileConfiguration, kernel::PreconditionError};

#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Precondition violated: {0}")]
    Precondition(#[from] PreconditionError),
    #[error(
        "Tile configuration {configuration} needs {required_bytes} bytes of fast memory but only {available_bytes} are available"
    )]
    HardwareUnsupported {
        configuration: TileConfiguration,
        required_bytes: usize,
        available_bytes: usize,
    },
    #[error("Failed to build the worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}
