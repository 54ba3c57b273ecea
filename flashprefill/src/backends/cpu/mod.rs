mod backend;
mod context;
pub mod kernel;

pub use backend::Cpu;
pub use context::CpuContext;
pub use kernel::{CpuKernels, FlashPrefillCpuKernel};
