use ndarray::{ArrayView3, ArrayViewMut3};

use crate::{
    ArrayElement, Error,
    backends::{
        common::kernel::{FlashPrefill, FlashPrefillArguments},
        cpu::{Cpu, CpuContext},
    },
    kernel::{AttentionOptions, BatchDescriptor},
};

/// Varlen prefill attention on the CPU backend.
///
/// `keys` and `values` are laid out as `options.kv_layout` and `values` may
/// alias `keys`. `output` is written in place; on error it is left untouched.
/// Use [`FlashPrefill`] directly to keep specializations across calls or to
/// also receive the log-sum-exp.
pub fn flash_attention_forward<T: ArrayElement>(
    context: &CpuContext,
    queries: ArrayView3<'_, T>,
    keys: ArrayView3<'_, T>,
    values: ArrayView3<'_, T>,
    output: ArrayViewMut3<'_, T>,
    batch: &BatchDescriptor,
    options: &AttentionOptions,
) -> Result<(), Error> {
    FlashPrefill::<Cpu>::new(T::data_type(), *options).forward(
        context,
        // Reborrowed so the inputs may come from differently scoped views.
        FlashPrefillArguments {
            queries: queries.view(),
            keys: keys.view(),
            values: values.view(),
            output,
            log_sum_exp: None,
            batch,
        },
    )
}
