mod flash_prefill;

pub use flash_prefill::FlashPrefillCpuKernel;

use crate::backends::{common::Kernels, cpu::backend::Cpu};

pub struct CpuKernels;

impl Kernels for CpuKernels {
    type Backend = Cpu;

    type FlashPrefillKernel = FlashPrefillCpuKernel;
}
