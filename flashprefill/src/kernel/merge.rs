use itertools::izip;
use ndarray::{ArrayView2, ArrayView3, ArrayViewMut2, ArrayViewMut3, Axis, s};

use super::PreconditionError;
use crate::ArrayElement;

/// Combines two partial attention results over disjoint key ranges.
///
/// Both parts must cover the same query rows and heads and carry the base-2
/// log-sum-exp produced by the forward pass. A part whose log-sum-exp is
/// `-inf` saw no admissible key and contributes nothing.
pub fn merge_attention_states<T: ArrayElement>(
    output_a: ArrayView3<'_, T>,
    log_sum_exp_a: ArrayView2<'_, f32>,
    output_b: ArrayView3<'_, T>,
    log_sum_exp_b: ArrayView2<'_, f32>,
    mut output: ArrayViewMut3<'_, T>,
    mut log_sum_exp: Option<ArrayViewMut2<'_, f32>>,
) -> Result<(), PreconditionError> {
    let expected = output.shape().to_vec();
    for shape in [output_a.shape(), output_b.shape()] {
        if shape != expected.as_slice() {
            return Err(PreconditionError::OutputShapeMismatch {
                expected: expected.clone(),
                actual: shape.to_vec(),
            });
        }
    }
    let expected_lse = expected[..2].to_vec();
    let lse_shapes = [Some(log_sum_exp_a.shape()), Some(log_sum_exp_b.shape()), log_sum_exp.as_ref().map(|lse| lse.shape())];
    for shape in lse_shapes.into_iter().flatten() {
        if shape != expected_lse.as_slice() {
            return Err(PreconditionError::LogSumExpShapeMismatch {
                expected: expected_lse,
                actual: shape.to_vec(),
            });
        }
    }

    for (token, mut output_row) in output.axis_iter_mut(Axis(0)).enumerate() {
        for (head, mut output_head) in output_row.axis_iter_mut(Axis(0)).enumerate() {
            let lse_a = log_sum_exp_a[[token, head]];
            let lse_b = log_sum_exp_b[[token, head]];
            let max = lse_a.max(lse_b);
            let (weight_a, weight_b, merged) = if max == f32::NEG_INFINITY {
                (0.0, 0.0, f32::NEG_INFINITY)
            } else {
                let merged = max + ((lse_a - max).exp2() + (lse_b - max).exp2()).log2();
                ((lse_a - merged).exp2(), (lse_b - merged).exp2(), merged)
            };

            let part_a = output_a.slice(s![token, head, ..]);
            let part_b = output_b.slice(s![token, head, ..]);
            for (target, &a, &b) in izip!(output_head.iter_mut(), part_a.iter(), part_b.iter()) {
                *target = T::from_f32(weight_a * a.to_f32() + weight_b * b.to_f32());
            }
            if let Some(lse) = log_sum_exp.as_mut() {
                lse[[token, head]] = merged;
            }
        }
    }
    Ok(())
}
