mod bench;
mod problem;
mod tune;
mod verify;

pub use bench::handle_bench;
pub use problem::{DeviceArgs, Precision, ProblemArgs, SyntheticBatch};
pub use tune::handle_tune;
pub use verify::handle_verify;
