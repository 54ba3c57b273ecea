//! Two-phase key/value sweep of a single query tile.

use std::ops::Range;

use ndarray::{Array2, ArrayView2, linalg::general_mat_mul, s};

use super::{
    HeadDimSplit,
    accumulator::{OnlineSoftmax, SoftmaxOutput},
    mask::{MaskingPolicy, SweepPhase},
};
use crate::ArrayElement;

/// Key ranges visited by one query tile, aligned to `block_n`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeySweep {
    pub loop_start: usize,
    pub bulk_end: usize,
    pub boundary_start: usize,
    pub boundary_end: usize,
}

impl KeySweep {
    pub fn bulk(&self) -> Range<usize> {
        self.loop_start..self.bulk_end.max(self.loop_start)
    }

    pub fn boundary(&self) -> Range<usize> {
        self.boundary_start..self.boundary_end.max(self.boundary_start)
    }
}

/// Query, key and value rows of one `(sequence, head)` pair, token-major.
#[derive(Debug, Clone, Copy)]
pub struct SequenceHead<'a, T> {
    pub queries: ArrayView2<'a, T>,
    pub keys: ArrayView2<'a, T>,
    /// `None` when the values alias the keys.
    pub values: Option<ArrayView2<'a, T>>,
}

/// Compile-time parameters of the tile computation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PrefillSweep {
    pub split: HeadDimSplit,
    pub block_m: usize,
    pub block_n: usize,
    pub sm_scale: f32,
    pub masking: MaskingPolicy,
}

impl PrefillSweep {
    pub fn key_sweep(
        &self,
        tile_start: usize,
        q_len: usize,
        kv_len: usize,
    ) -> KeySweep {
        let block_n = self.block_n as isize;
        let history = kv_len as isize - q_len as isize;
        let diagonal = history + tile_start as isize;
        let align = |position: isize| (position.max(0) / block_n * block_n) as usize;

        let loop_start = match self.masking.window() {
            Some(window) => align(diagonal - window as isize + 1),
            None => 0,
        };
        let bulk_end = if self.masking.causal() {
            align(diagonal)
        } else {
            align(kv_len as isize)
        };
        let boundary_end = if self.masking.causal() {
            kv_len.min(bulk_end + self.block_m + self.block_n)
        } else {
            kv_len
        };
        KeySweep {
            loop_start,
            bulk_end,
            boundary_start: bulk_end.max(loop_start),
            boundary_end,
        }
    }

    /// Attention of query rows `tile_start..tile_start + block_m` (clipped to
    /// the sequence) over the admissible keys.
    pub fn run<T: ArrayElement>(
        &self,
        tile_start: usize,
        head: &SequenceHead<'_, T>,
    ) -> SoftmaxOutput {
        let split = &self.split;
        let q_len = head.queries.nrows();
        let rows = self.block_m.min(q_len.saturating_sub(tile_start));

        let queries = load_block(head.queries, tile_start, 0, rows, split.block_dk);
        let queries_tail = split
            .is_split()
            .then(|| load_block(head.queries, tile_start, split.block_dk, rows, split.block_dk1));

        let mut softmax = OnlineSoftmax::new(rows, split.block_dv);
        let sweep = self.key_sweep(tile_start, q_len, head.keys.nrows());
        for (phase, keys) in [(SweepPhase::Bulk, sweep.bulk()), (SweepPhase::Boundary, sweep.boundary())] {
            for key_start in keys.step_by(self.block_n) {
                self.attend_key_tile(phase, &queries, queries_tail.as_ref(), head, tile_start, key_start, &mut softmax);
            }
        }
        softmax.finish()
    }

    fn attend_key_tile<T: ArrayElement>(
        &self,
        phase: SweepPhase,
        queries: &Array2<f32>,
        queries_tail: Option<&Array2<f32>>,
        head: &SequenceHead<'_, T>,
        tile_start: usize,
        key_start: usize,
        softmax: &mut OnlineSoftmax,
    ) {
        let split = &self.split;
        let q_len = head.queries.nrows();
        let kv_len = head.keys.nrows();

        // block_dk x block_n
        let keys = load_block(head.keys, key_start, 0, self.block_n, split.block_dk).reversed_axes();
        let mut scores = queries.dot(&keys);
        if let Some(queries_tail) = queries_tail {
            let keys_tail = load_block(head.keys, key_start, split.block_dk, self.block_n, split.block_dk1).reversed_axes();
            general_mat_mul(1.0, queries_tail, &keys_tail, 1.0, &mut scores);
        }

        self.masking.transform_scores(
            scores.view_mut(),
            phase,
            self.sm_scale,
            tile_start,
            key_start,
            kv_len as isize - q_len as isize,
            kv_len,
        );

        match head.values {
            Some(values) => {
                let values = load_block(values, key_start, 0, self.block_n, split.block_dv);
                softmax.update(scores.view_mut(), values.view());
            },
            None => softmax.update(scores.view_mut(), keys.t()),
        }
    }
}

/// Copies a `rows x columns` window of `source` widened to `f32`. Positions
/// past the end of `source` are zero.
fn load_block<T: ArrayElement>(
    source: ArrayView2<'_, T>,
    row_start: usize,
    column_start: usize,
    rows: usize,
    columns: usize,
) -> Array2<f32> {
    let mut block = Array2::zeros((rows, columns));
    let row_end = (row_start + rows).min(source.nrows());
    let column_end = (column_start + columns).min(source.ncols());
    if row_start < row_end && column_start < column_end {
        block
            .slice_mut(s![..row_end - row_start, ..column_end - column_start])
            .zip_mut_with(&source.slice(s![row_start..row_end, column_start..column_end]), |target, &value| {
                *target = value.to_f32()
            });
    }
    block
}

#[cfg(test)]
mod tests {
    use ndarray::Array2;

    use super::*;

    fn sweep(
        block_m: usize,
        block_n: usize,
        causal: bool,
        window_size: i32,
    ) -> PrefillSweep {
        PrefillSweep {
            split: HeadDimSplit::new(4, 4),
            block_m,
            block_n,
            sm_scale: 0.5,
            masking: MaskingPolicy::new(causal, window_size, -1.0),
        }
    }

    #[test]
    fn test_causal_key_sweep() {
        let ranges = sweep(32, 16, true, -1).key_sweep(64, 100, 100);
        assert_eq!(
            ranges,
            KeySweep {
                loop_start: 0,
                bulk_end: 64,
                boundary_start: 64,
                boundary_end: 100,
            }
        );

        // history shifts the diagonal: 40 + 0 = 40 -> bulk ends at 32
        let with_history = sweep(32, 16, true, -1).key_sweep(0, 20, 60);
        assert_eq!(with_history.bulk(), 0..32);
        assert_eq!(with_history.boundary(), 32..60);
    }

    #[test]
    fn test_window_skips_leading_key_tiles() {
        let ranges = sweep(32, 16, true, 20).key_sweep(64, 100, 100);
        // max(64 - 20 + 1, 0) = 45 rounded down to 32
        assert_eq!(ranges.loop_start, 32);
        assert_eq!(ranges.bulk(), 32..64);

        let narrow = sweep(16, 16, true, 4).key_sweep(96, 128, 128);
        assert_eq!(narrow.loop_start, 80);
        assert_eq!(narrow.boundary_start, 96);
    }

    #[test]
    fn test_non_causal_key_sweep() {
        let ranges = sweep(32, 16, false, -1).key_sweep(0, 10, 100);
        assert_eq!(ranges.bulk(), 0..96);
        assert_eq!(ranges.boundary(), 96..100);
    }

    #[test]
    fn test_single_query_attends_single_key() {
        let queries = Array2::from_elem((1, 4), 1.0f32);
        let keys = Array2::from_elem((1, 4), 2.0f32);
        let values = Array2::from_shape_vec((1, 4), vec![1.0f32, 2.0, 3.0, 4.0]).unwrap();
        let head = SequenceHead {
            queries: queries.view(),
            keys: keys.view(),
            values: Some(values.view()),
        };

        let output = sweep(16, 16, true, -1).run(0, &head);
        assert_eq!(output.values.dim(), (1, 4));
        for (actual, expected) in output.values.iter().zip(values.iter()) {
            assert!((actual - expected).abs() < 1e-6);
        }
        // one key with logit 8 * 0.5 = 4 nats
        assert!((output.log_sum_exp[0] - 4.0 * std::f32::consts::LOG2_E).abs() < 1e-5);
    }

    #[test]
    fn test_tile_sizes_agree() {
        let queries = Array2::from_shape_fn((37, 4), |(row, column)| ((row * 7 + column * 3) % 11) as f32 / 11.0 - 0.5);
        let keys = Array2::from_shape_fn((45, 4), |(row, column)| ((row * 5 + column) % 13) as f32 / 13.0 - 0.5);
        let values = Array2::from_shape_fn((45, 4), |(row, column)| ((row + column * 9) % 17) as f32 / 17.0);
        let head = SequenceHead {
            queries: queries.view(),
            keys: keys.view(),
            values: Some(values.view()),
        };

        let collect = |plan: PrefillSweep| {
            let mut rows = Array2::<f32>::zeros((37, 4));
            for tile_start in (0..37).step_by(plan.block_m) {
                let output = plan.run(tile_start, &head);
                let end = tile_start + output.values.nrows();
                rows.slice_mut(s![tile_start..end, ..]).assign(&output.values);
            }
            rows
        };

        let small = collect(sweep(16, 16, true, 9));
        let large = collect(sweep(64, 32, true, 9));
        let odd = collect(sweep(8, 128, true, 9));
        for ((a, b), c) in small.iter().zip(large.iter()).zip(odd.iter()) {
            assert!((a - b).abs() < 1e-5);
            assert!((a - c).abs() < 1e-5);
        }
    }

    #[test]
    fn test_load_block_pads_with_zeros() {
        let source = Array2::from_elem((3, 5), 1.0f32);
        let block = load_block(source.view(), 2, 3, 4, 4);
        assert_eq!(block.dim(), (4, 4));
        assert_eq!(block.sum(), 2.0);
    }
}
