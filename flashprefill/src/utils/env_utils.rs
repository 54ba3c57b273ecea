#[derive(Copy, Clone, Debug)]
pub enum EnvVar {
    DeviceCapability,
    LegacyToolchain,
    NumThreads,
}

impl EnvVar {
    pub fn key(&self) -> &'static str {
        match self {
            EnvVar::DeviceCapability => "FLASHPREFILL_DEVICE_CAPABILITY",
            EnvVar::LegacyToolchain => "FLASHPREFILL_LEGACY_TOOLCHAIN",
            EnvVar::NumThreads => "FLASHPREFILL_NUM_THREADS",
        }
    }

    pub fn value(&self) -> String {
        std::env::var(self.key()).unwrap_or_default()
    }

    pub fn is_set(&self) -> bool {
        !self.value().trim().is_empty()
    }

    pub fn is_enabled(&self) -> bool {
        let upper = self.value().to_ascii_uppercase();
        matches!(upper.as_str(), "1" | "YES" | "TRUE")
    }
}
