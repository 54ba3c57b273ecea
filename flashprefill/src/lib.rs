pub mod backends;
pub mod config;
pub mod data_type;
pub mod device;
pub mod error;
pub mod forward;
pub mod kernel;
pub mod reference;
pub mod utils;

pub use backends::{
    common::{
        Backend, Context, Kernels,
        kernel::{FlashPrefill, FlashPrefillArguments, FlashPrefillSpecialization},
    },
    cpu::{Cpu, CpuContext},
};
pub use config::*;
pub use data_type::*;
pub use device::*;
pub use error::Error;
pub use forward::flash_attention_forward;
pub use utils::*;
