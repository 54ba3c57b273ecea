//! Materialized attention in `f64`, used to check the tiled kernel.

use ndarray::{Array2, Array3, ArrayView3, s};

use crate::{
    ArrayElement, ConfigError, Error,
    kernel::{AttentionOptions, BatchDescriptor},
};

pub struct ReferenceOutput {
    /// `[total_q_tokens, num_heads, head_dim_v]`
    pub output: Array3<f32>,
    /// Base-2 log-sum-exp, `[total_q_tokens, num_heads]`.
    pub log_sum_exp: Array2<f32>,
}

/// Computes every score row in full and applies a plain softmax. Rows with no
/// admissible key are zero with a log-sum-exp of `-inf`.
pub fn reference_attention<T: ArrayElement>(
    queries: ArrayView3<'_, T>,
    keys: ArrayView3<'_, T>,
    values: ArrayView3<'_, T>,
    batch: &BatchDescriptor,
    options: &AttentionOptions,
) -> Result<ReferenceOutput, Error> {
    let keys = options.kv_layout.to_token_major(keys);
    let values = options.kv_layout.to_token_major(values);
    let (q_tokens, num_heads, head_dim_k) = queries.dim();
    let (kv_tokens, num_kv_heads, _) = keys.dim();
    let head_dim_v = values.dim().2;
    if num_kv_heads == 0 || num_heads % num_kv_heads != 0 {
        return Err(ConfigError::IndivisibleHeads {
            num_heads,
            num_kv_heads,
        }
        .into());
    }
    batch.validate(q_tokens, kv_tokens.min(values.dim().0), options.causal)?;

    let group = num_heads / num_kv_heads;
    let scale = f64::from(options.scale_for(head_dim_k));
    let window = (options.window_size > 0).then_some(options.window_size as isize);
    let softcap = (options.logit_softcapping > 0.0).then_some(f64::from(options.logit_softcapping));

    let mut output = Array3::zeros((q_tokens, num_heads, head_dim_v));
    let mut log_sum_exp = Array2::from_elem((q_tokens, num_heads), f32::NEG_INFINITY);
    for span in batch.sequences() {
        let history = span.history_len();
        for head in 0..num_heads {
            let kv_head = head / group;
            for row in 0..span.q_len {
                let token = span.q_start + row;
                let diagonal = history + row as isize;
                let last_key = span.kv_len as isize - 1;
                let upper = if options.causal {
                    diagonal.min(last_key)
                } else {
                    last_key
                };
                let lower = window.map_or(0, |window| (diagonal - window + 1).max(0));
                if lower > upper {
                    continue;
                }

                let query = queries.slice(s![token, head, ..]);
                let scores = (lower..=upper)
                    .map(|key| {
                        let key_row = keys.slice(s![span.kv_start + key as usize, kv_head, ..]);
                        let dot = query
                            .iter()
                            .zip(key_row.iter())
                            .map(|(&q, &k)| f64::from(q.to_f32()) * f64::from(k.to_f32()))
                            .sum::<f64>();
                        let score = dot * scale;
                        match softcap {
                            Some(cap) => cap * (score / cap).tanh(),
                            None => score,
                        }
                    })
                    .collect::<Vec<_>>();

                let max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                let weights = scores.iter().map(|score| (score - max).exp()).collect::<Vec<_>>();
                let normalizer = weights.iter().sum::<f64>();
                for column in 0..head_dim_v {
                    let weighted = (lower..=upper)
                        .zip(weights.iter())
                        .map(|(key, weight)| {
                            weight * f64::from(values[[span.kv_start + key as usize, kv_head, column]].to_f32())
                        })
                        .sum::<f64>();
                    output[[token, head, column]] = (weighted / normalizer) as f32;
                }
                log_sum_exp[[token, head]] = ((max + normalizer.ln()) * std::f64::consts::LOG2_E) as f32;
            }
        }
    }

    Ok(ReferenceOutput {
        output,
        log_sum_exp,
    })
}
