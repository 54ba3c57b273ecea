use std::rc::Rc;

use log::debug;
use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::{
    DeviceConfig, Error, KernelTuning,
    backends::{
        common::{Backend, Context},
        cpu::backend::Cpu,
    },
};

pub struct CpuContext {
    config: DeviceConfig,
    tuning: KernelTuning,
    thread_pool: ThreadPool,
}

impl CpuContext {
    /// Builds a context from the `FLASHPREFILL_*` environment variables.
    pub fn from_env() -> Result<Rc<Self>, Error> {
        Self::new(DeviceConfig::from_env()?)
    }

    pub fn thread_pool(&self) -> &ThreadPool {
        &self.thread_pool
    }

    pub fn num_threads(&self) -> usize {
        self.thread_pool.current_num_threads()
    }
}

impl Context for CpuContext {
    type Backend = Cpu;

    fn new(config: DeviceConfig) -> Result<Rc<Self>, <Self::Backend as Backend>::Error> {
        let mut builder = ThreadPoolBuilder::new().thread_name(|index| format!("flashprefill-{index}"));
        if let Some(num_threads) = config.num_threads {
            builder = builder.num_threads(num_threads);
        }
        let thread_pool = builder.build()?;
        let tuning = KernelTuning::new(config.capability, config.legacy_toolchain);
        debug!(
            "CPU context: {} threads, capability {}, tile memory budget {} bytes",
            thread_pool.current_num_threads(),
            config.capability.map_or_else(|| "unset".to_string(), |capability| capability.to_string()),
            config.tile_memory_budget
        );
        Ok(Rc::new(Self {
            config,
            tuning,
            thread_pool,
        }))
    }

    fn config(&self) -> &DeviceConfig {
        &self.config
    }

    fn tuning(&self) -> &KernelTuning {
        &self.tuning
    }
}
