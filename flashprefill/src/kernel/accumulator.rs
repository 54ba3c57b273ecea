use ndarray::{Array1, Array2, ArrayView2, ArrayViewMut2, Axis, linalg::general_mat_mul};

use super::mask::MASKED_SCORE;

/// Streaming softmax state of the rows of one query tile, in the base-2
/// domain. Always `f32`, whatever the element type of the inputs.
#[derive(Debug, Clone)]
pub struct OnlineSoftmax {
    max: Array1<f32>,
    normalizer: Array1<f32>,
    accumulator: Array2<f32>,
}

pub struct SoftmaxOutput {
    /// `rows x block_dv`, normalized.
    pub values: Array2<f32>,
    /// Base-2 log-sum-exp per row.
    pub log_sum_exp: Array1<f32>,
}

impl OnlineSoftmax {
    pub fn new(
        rows: usize,
        block_dv: usize,
    ) -> Self {
        Self {
            max: Array1::from_elem(rows, f32::NEG_INFINITY),
            normalizer: Array1::zeros(rows),
            accumulator: Array2::zeros((rows, block_dv)),
        }
    }

    /// Folds one key tile in. `scores` holds base-2 logits (`rows x block_n`)
    /// and is overwritten with the unnormalized probabilities; `values` is
    /// `block_n x block_dv`.
    pub fn update(
        &mut self,
        mut scores: ArrayViewMut2<'_, f32>,
        values: ArrayView2<'_, f32>,
    ) {
        for (((mut row, max), normalizer), mut accumulator) in scores
            .outer_iter_mut()
            .zip(self.max.iter_mut())
            .zip(self.normalizer.iter_mut())
            .zip(self.accumulator.axis_iter_mut(Axis(0)))
        {
            let row_max = row.fold(f32::NEG_INFINITY, |acc, &score| acc.max(score));
            let new_max = max.max(row_max);
            let alpha = (*max - new_max).exp2();

            row.mapv_inplace(|score| (score - new_max).exp2());
            *normalizer = alpha * *normalizer + row.sum();
            accumulator *= alpha;
            *max = new_max;
        }
        general_mat_mul(1.0, &scores, &values, 1.0, &mut self.accumulator);
    }

    pub fn finish(self) -> SoftmaxOutput {
        let Self {
            max,
            normalizer,
            mut accumulator,
        } = self;
        let mut log_sum_exp = Array1::from_elem(max.len(), f32::NEG_INFINITY);
        for (((mut row, &max), &sum), lse) in accumulator
            .axis_iter_mut(Axis(0))
            .zip(max.iter())
            .zip(normalizer.iter())
            .zip(log_sum_exp.iter_mut())
        {
            // A row that never saw an admissible key is left at zero.
            if max <= MASKED_SCORE || sum == 0.0 {
                row.fill(0.0);
                continue;
            }
            row /= sum;
            *lse = max + sum.log2();
        }
        SoftmaxOutput {
            values: accumulator,
            log_sum_exp,
        }
    }
}
