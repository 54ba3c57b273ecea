use log::trace;
use ndarray::s;
use rayon::prelude::*;

use crate::{
    ArrayElement, ConfigError, Error,
    backends::{
        common::{
            Backend,
            kernel::{FlashPrefillDispatch, FlashPrefillKernel, FlashPrefillSpecialization},
        },
        cpu::{backend::Cpu, context::CpuContext},
    },
    kernel::{PrefillSweep, SequenceHead, SoftmaxOutput, TileIndex},
};

pub struct FlashPrefillCpuKernel {
    specialization: FlashPrefillSpecialization,
}

struct TileResult {
    tile: TileIndex,
    first_row: usize,
    output: SoftmaxOutput,
}

impl FlashPrefillKernel for FlashPrefillCpuKernel {
    type Backend = Cpu;

    fn new(
        _context: &<Self::Backend as Backend>::Context,
        specialization: FlashPrefillSpecialization,
    ) -> Result<Self, <Self::Backend as Backend>::Error> {
        let tile_configuration = specialization.tile_configuration;
        if tile_configuration.block_m == 0 || tile_configuration.block_n == 0 {
            return Err(ConfigError::ZeroTileSize {
                block_m: tile_configuration.block_m,
                block_n: tile_configuration.block_n,
            }
            .into());
        }
        Ok(Self {
            specialization,
        })
    }

    fn specialization(&self) -> &FlashPrefillSpecialization {
        &self.specialization
    }

    fn encode<T: ArrayElement>(
        &self,
        context: &CpuContext,
        dispatch: FlashPrefillDispatch<'_, '_, T>,
    ) -> Result<(), Error> {
        let FlashPrefillDispatch {
            queries,
            keys,
            values,
            mut output,
            mut log_sum_exp,
            batch,
            grid,
            sm_scale,
            masking,
            kv_group_num,
        } = dispatch;
        let specialization = &self.specialization;
        let sweep = PrefillSweep {
            split: specialization.split,
            block_m: specialization.tile_configuration.block_m,
            block_n: specialization.tile_configuration.block_n,
            sm_scale,
            masking,
        };
        let shared_kv = specialization.shared_kv;

        let tiles = grid.active_tiles(batch).collect::<Vec<_>>();
        trace!("Dispatching {} of {} tiles on {} threads", tiles.len(), grid.len(), context.num_threads());

        let results = context.thread_pool().install(|| {
            tiles
                .par_iter()
                .map(|&tile| {
                    let span = batch.sequence(tile.batch);
                    let kv_head = tile.head / kv_group_num;
                    let q_rows = span.q_start..span.q_start + span.q_len;
                    let kv_rows = span.kv_start..span.kv_start + span.kv_len;
                    let head = SequenceHead {
                        queries: queries.slice(s![q_rows, tile.head, ..]),
                        keys: keys.slice(s![kv_rows.clone(), kv_head, ..]),
                        values: (!shared_kv).then(|| values.slice(s![kv_rows, kv_head, ..])),
                    };
                    let (tile_start, _) = grid.row_range(tile, span.q_len);
                    TileResult {
                        tile,
                        first_row: span.q_start + tile_start,
                        output: sweep.run(tile_start, &head),
                    }
                })
                .collect::<Vec<_>>()
        });

        // Tiles own disjoint output rows.
        let head_dim_v = specialization.split.head_dim_v;
        for TileResult {
            tile,
            first_row,
            output: tile_output,
        } in results
        {
            let rows = first_row..first_row + tile_output.values.nrows();
            output
                .slice_mut(s![rows.clone(), tile.head, ..])
                .zip_mut_with(&tile_output.values.slice(s![.., ..head_dim_v]), |target, &value| {
                    *target = T::from_f32(value)
                });
            if let Some(log_sum_exp) = log_sum_exp.as_mut() {
                log_sum_exp.slice_mut(s![rows, tile.head]).assign(&tile_output.log_sum_exp);
            }
        }
        Ok(())
    }
}
