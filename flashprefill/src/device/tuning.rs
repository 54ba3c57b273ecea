//! Per-generation tile tuning.
//!
//! Tile sizes only affect throughput. Any entry of this table, the conservative
//! default included, produces the same attention up to rounding.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::DeviceCapability;
use crate::kernel::HeadDimSplit;

const MAX_BLOCK_M: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TileConfiguration {
    pub block_m: usize,
    pub block_n: usize,
    pub num_warps: usize,
    pub num_stages: usize,
}

impl TileConfiguration {
    pub const CONSERVATIVE: Self = Self::new(64, 32, 4, 2);

    pub const fn new(
        block_m: usize,
        block_n: usize,
        num_warps: usize,
        num_stages: usize,
    ) -> Self {
        Self {
            block_m,
            block_n,
            num_warps,
            num_stages,
        }
    }

    /// Bytes of fast memory one tile keeps live: the query chunks, the
    /// accumulator, the score block and `num_stages` buffered key/value tiles.
    pub fn working_set_bytes(
        &self,
        split: &HeadDimSplit,
        shared_kv: bool,
    ) -> usize {
        let block_dk = split.block_dk + split.block_dk1;
        let staged_dv = if shared_kv {
            0
        } else {
            split.block_dv
        };
        let elements = self.block_m * (block_dk + split.block_dv)
            + self.block_m * self.block_n
            + self.num_stages.max(1) * self.block_n * (block_dk + staged_dv);
        elements * size_of::<f32>()
    }
}

impl Default for TileConfiguration {
    fn default() -> Self {
        Self::CONSERVATIVE
    }
}

impl fmt::Display for TileConfiguration {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(
            f,
            "{}x{} ({} warps, {} stages)",
            self.block_m, self.block_n, self.num_warps, self.num_stages
        )
    }
}

/// Immutable tuning strategy, resolved once when the context is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct KernelTuning {
    capability: Option<DeviceCapability>,
    legacy_toolchain: bool,
}

impl KernelTuning {
    pub fn new(
        capability: Option<DeviceCapability>,
        legacy_toolchain: bool,
    ) -> Self {
        Self {
            capability,
            legacy_toolchain,
        }
    }

    pub fn tile_configuration(
        &self,
        block_dk: usize,
        shared_kv: bool,
    ) -> TileConfiguration {
        match self.capability {
            Some(capability) => select_tile_configuration(capability, block_dk, shared_kv, self.legacy_toolchain),
            None => TileConfiguration::CONSERVATIVE,
        }
    }
}

pub fn select_tile_configuration(
    capability: DeviceCapability,
    block_dk: usize,
    shared_kv: bool,
    legacy_toolchain: bool,
) -> TileConfiguration {
    let block_dk = block_dk.max(1);
    let mut configuration = match capability.major {
        0..8 => tile_configuration_sm7x(block_dk),
        8 if matches!(capability.minor, 6 | 9) => tile_configuration_sm86(block_dk),
        8 => tile_configuration_sm8x(block_dk, shared_kv),
        9 => tile_configuration_sm9x(block_dk, shared_kv, legacy_toolchain),
        _ => tile_configuration_sm12x(block_dk, shared_kv),
    };
    configuration.block_m = configuration.block_m.min(MAX_BLOCK_M);
    configuration
}

fn tile_configuration_sm7x(block_dk: usize) -> TileConfiguration {
    let num_stages = (768 / block_dk).clamp(2, 4);
    let block_m = (8192 / block_dk).max(16);
    TileConfiguration::new(block_m, 32, 4, num_stages)
}

// 8.6 and 8.9 have less shared memory than 8.0.
fn tile_configuration_sm86(block_dk: usize) -> TileConfiguration {
    if block_dk <= 128 {
        TileConfiguration::new(128, 64, 4, 3)
    } else if block_dk <= 256 {
        TileConfiguration::new(64, 32, 4, 2)
    } else {
        TileConfiguration::new(32, 32, 4, 2)
    }
}

fn tile_configuration_sm8x(
    block_dk: usize,
    shared_kv: bool,
) -> TileConfiguration {
    let min_m = if shared_kv {
        64
    } else {
        16
    };
    let block_m = (16384 / block_dk).max(min_m).min(128);
    let num_stages = if block_dk <= 128 {
        3
    } else {
        2
    };
    TileConfiguration::new(block_m, block_m, 8, num_stages)
}

fn tile_configuration_sm9x(
    block_dk: usize,
    shared_kv: bool,
    legacy_toolchain: bool,
) -> TileConfiguration {
    let mut num_warps = 8;
    let mut block_m = if block_dk <= 256 {
        128
    } else {
        64
    };
    if !shared_kv && block_dk >= 512 {
        block_m = 32;
    }
    if legacy_toolchain && block_dk >= 512 {
        block_m = 32;
        num_warps = 4;
    }
    let block_n = if block_dk <= 128 {
        128
    } else {
        64
    };
    let num_stages = if block_dk <= 128 {
        3
    } else {
        2
    };
    TileConfiguration::new(block_m, block_n, num_warps, num_stages)
}

fn tile_configuration_sm12x(
    block_dk: usize,
    shared_kv: bool,
) -> TileConfiguration {
    let shared_or = |shared: usize, separate: usize| {
        if shared_kv {
            shared
        } else {
            separate
        }
    };
    if block_dk <= 128 {
        TileConfiguration::new(128, shared_or(128, 64), 8, 3)
    } else if block_dk <= 256 {
        TileConfiguration::new(64, shared_or(128, 64), 8, 3)
    } else if block_dk <= 512 {
        TileConfiguration::new(shared_or(64, 32), 64, 4, 2)
    } else {
        TileConfiguration::new(32, shared_or(64, 32), 4, 2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn select(
        major: u32,
        minor: u32,
        block_dk: usize,
        shared_kv: bool,
    ) -> TileConfiguration {
        select_tile_configuration(DeviceCapability::new(major, minor), block_dk, shared_kv, false)
    }

    #[test]
    fn test_sm7x() {
        assert_eq!(select(7, 5, 64, false), TileConfiguration::new(128, 32, 4, 4));
        assert_eq!(select(7, 0, 128, false), TileConfiguration::new(64, 32, 4, 4));
        assert_eq!(select(7, 0, 512, false), TileConfiguration::new(16, 32, 4, 2));
        // 8192 / 32 = 256 is clamped by the global block_m limit
        assert_eq!(select(7, 0, 32, false).block_m, 128);
    }

    #[test]
    fn test_sm8x_and_reduced_memory_subgenerations() {
        assert_eq!(select(8, 0, 128, false), TileConfiguration::new(128, 128, 8, 3));
        assert_eq!(select(8, 0, 256, false), TileConfiguration::new(64, 64, 8, 2));
        assert_eq!(select(8, 0, 1024, false), TileConfiguration::new(16, 16, 8, 2));
        assert_eq!(select(8, 0, 1024, true), TileConfiguration::new(64, 64, 8, 2));

        assert_eq!(select(8, 6, 128, false), TileConfiguration::new(128, 64, 4, 3));
        assert_eq!(select(8, 9, 256, true), TileConfiguration::new(64, 32, 4, 2));
        assert_eq!(select(8, 6, 512, false), TileConfiguration::new(32, 32, 4, 2));
    }

    #[test]
    fn test_sm9x_legacy_toolchain_override() {
        assert_eq!(select(9, 0, 128, false), TileConfiguration::new(128, 128, 8, 3));
        assert_eq!(select(9, 0, 512, true), TileConfiguration::new(64, 64, 8, 2));
        assert_eq!(select(9, 0, 512, false), TileConfiguration::new(32, 64, 8, 2));

        let legacy = select_tile_configuration(DeviceCapability::new(9, 0), 512, true, true);
        assert_eq!(legacy, TileConfiguration::new(32, 64, 4, 2));
        let legacy_small = select_tile_configuration(DeviceCapability::new(9, 0), 128, true, true);
        assert_eq!(legacy_small, select(9, 0, 128, true));
    }

    #[test]
    fn test_sm12x() {
        assert_eq!(select(12, 0, 128, true), TileConfiguration::new(128, 128, 8, 3));
        assert_eq!(select(10, 0, 128, false), TileConfiguration::new(128, 64, 8, 3));
        assert_eq!(select(12, 0, 512, false), TileConfiguration::new(32, 64, 4, 2));
        assert_eq!(select(12, 0, 1024, true), TileConfiguration::new(32, 64, 4, 2));
    }

    #[test]
    fn test_without_capability_uses_conservative_default() {
        let tuning = KernelTuning::default();
        assert_eq!(tuning.tile_configuration(128, true), TileConfiguration::CONSERVATIVE);
        assert_eq!(tuning.tile_configuration(1024, false), TileConfiguration::CONSERVATIVE);
    }

    #[test]
    fn test_working_set_accounts_for_shared_kv() {
        let split = HeadDimSplit::new(128, 128);
        let configuration = TileConfiguration::new(64, 32, 4, 2);
        let separate = configuration.working_set_bytes(&split, false);
        let shared = configuration.working_set_bytes(&split, true);
        assert_eq!(separate - shared, 2 * 32 * 128 * 4);
        assert_eq!(separate, (64 * 256 + 64 * 32 + 2 * 32 * 256) * 4);
    }
}
