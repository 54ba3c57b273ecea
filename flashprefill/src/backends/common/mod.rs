mod backend;
mod context;
pub mod kernel;

pub use backend::Backend;
pub use context::Context;
pub use kernel::Kernels;
