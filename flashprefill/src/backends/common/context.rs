use std::rc::Rc;

use super::Backend;
use crate::{DeviceConfig, KernelTuning};

/// Long-lived per-device state, built once at startup and shared by every call.
pub trait Context: Sized {
    type Backend: Backend<Context = Self>;

    fn new(config: DeviceConfig) -> Result<Rc<Self>, <Self::Backend as Backend>::Error>;

    fn config(&self) -> &DeviceConfig;

    fn tuning(&self) -> &KernelTuning;

    fn tile_memory_budget(&self) -> usize {
        self.config().tile_memory_budget
    }
}
