use crate::{
    Error,
    backends::{
        common::Backend,
        cpu::{context::CpuContext, kernel::CpuKernels},
    },
};

#[derive(Debug, Clone)]
pub struct Cpu;

impl Backend for Cpu {
    type Context = CpuContext;
    type Kernels = CpuKernels;
    type Error = Error;
}
