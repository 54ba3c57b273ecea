use std::{
    cell::{Cell, RefCell},
    collections::{HashMap, hash_map::Entry},
};

use log::{debug, trace, warn};
use ndarray::{ArrayView3, ArrayViewMut2, ArrayViewMut3};

use crate::{
    ArrayElement, AttentionConfig, ConfigError, DataType, Error, TileConfiguration,
    backends::common::{Backend, Context, Kernels, kernel::FlashPrefillKernel},
    kernel::{AttentionOptions, BatchDescriptor, HeadDimSplit, MaskingPolicy, PreconditionError, TileGrid},
};

/// Inputs borrowed for `'i`, outputs for `'o`.
pub struct FlashPrefillArguments<'i, 'o, T> {
    /// `[total_q_tokens, num_heads, head_dim_k]`
    pub queries: ArrayView3<'i, T>,
    /// Laid out as `AttentionOptions::kv_layout`.
    pub keys: ArrayView3<'i, T>,
    /// Same layout as `keys`; may be the very same view.
    pub values: ArrayView3<'i, T>,
    /// `[total_q_tokens, num_heads, head_dim_v]`
    pub output: ArrayViewMut3<'o, T>,
    /// `[total_q_tokens, num_heads]`, base-2.
    pub log_sum_exp: Option<ArrayViewMut2<'o, f32>>,
    pub batch: &'i BatchDescriptor,
}

/// Validated, token-major arguments handed to a kernel.
pub struct FlashPrefillDispatch<'i, 'o, T> {
    pub queries: ArrayView3<'i, T>,
    pub keys: ArrayView3<'i, T>,
    pub values: ArrayView3<'i, T>,
    pub output: ArrayViewMut3<'o, T>,
    pub log_sum_exp: Option<ArrayViewMut2<'o, f32>>,
    pub batch: &'i BatchDescriptor,
    pub grid: TileGrid,
    pub sm_scale: f32,
    pub masking: MaskingPolicy,
    pub kv_group_num: usize,
}

/// Everything a kernel is specialized on. Runtime scalars (scale, window
/// size, softcap value) are not part of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FlashPrefillSpecialization {
    pub data_type: DataType,
    pub split: HeadDimSplit,
    pub tile_configuration: TileConfiguration,
    pub causal: bool,
    pub sliding_window: bool,
    pub softcapping: bool,
    pub shared_kv: bool,
}

struct ValidatedShape {
    num_heads: usize,
    num_kv_heads: usize,
    head_dim_k: usize,
    head_dim_v: usize,
    max_q_seqlen: usize,
}

pub struct FlashPrefill<B: Backend> {
    data_type: DataType,
    options: AttentionOptions,
    cache: RefCell<HashMap<FlashPrefillSpecialization, <B::Kernels as Kernels>::FlashPrefillKernel>>,
    last_specialization: Cell<Option<FlashPrefillSpecialization>>,
}

impl<B: Backend> FlashPrefill<B> {
    pub fn new(
        data_type: DataType,
        options: AttentionOptions,
    ) -> Self {
        let cache = RefCell::new(HashMap::new());
        Self {
            data_type,
            options,
            cache,
            last_specialization: Cell::new(None),
        }
    }

    pub fn from_config(
        data_type: DataType,
        config: &AttentionConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::new(data_type, config.options()))
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    pub fn options(&self) -> &AttentionOptions {
        &self.options
    }

    pub fn cached_specializations(&self) -> usize {
        self.cache.borrow().len()
    }

    /// Specialization of the last successful call, including the tile
    /// configuration actually used after any budget fallback.
    pub fn last_specialization(&self) -> Option<FlashPrefillSpecialization> {
        self.last_specialization.get()
    }

    /// Computes attention for every sequence of the batch into
    /// `arguments.output`. Nothing is written when an error is returned.
    pub fn forward<T: ArrayElement>(
        &self,
        context: &B::Context,
        arguments: FlashPrefillArguments<'_, '_, T>,
    ) -> Result<(), Error> {
        if T::data_type() != self.data_type {
            return Err(ConfigError::DataTypeMismatch {
                expected: self.data_type,
                actual: T::data_type(),
            }
            .into());
        }

        // Aliasing is decided on the caller's views, before any permutation.
        let aliased_kv = arguments.keys.as_ptr() == arguments.values.as_ptr()
            && arguments.keys.dim() == arguments.values.dim()
            && arguments.keys.strides() == arguments.values.strides();

        let FlashPrefillArguments {
            queries,
            keys,
            values,
            output,
            log_sum_exp,
            batch,
        } = arguments;
        let layout = self.options.kv_layout;
        let keys = layout.to_token_major(keys);
        let values = layout.to_token_major(values);

        let shape = self.validate(&queries, &keys, &values, &output, log_sum_exp.as_ref(), batch)?;
        let split = HeadDimSplit::new(shape.head_dim_k, shape.head_dim_v);
        let shared_kv = aliased_kv && split.block_dk == split.block_dv;
        let tile_configuration = self.tile_configuration(context, &split, shared_kv)?;

        let specialization = FlashPrefillSpecialization {
            data_type: self.data_type,
            split,
            tile_configuration,
            causal: self.options.causal,
            sliding_window: self.options.window_size > 0,
            softcapping: self.options.logit_softcapping > 0.0,
            shared_kv,
        };
        let grid = TileGrid::new(shape.max_q_seqlen, shape.num_heads, batch.len(), tile_configuration.block_m);
        trace!(
            "Flash prefill: {} sequences, {} query tokens, {} heads, {} kv heads, {} tiles",
            batch.len(),
            queries.dim().0,
            shape.num_heads,
            shape.num_kv_heads,
            grid.len()
        );

        let mut map = self.cache.borrow_mut();
        let kernel = match map.entry(specialization) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                debug!("Building flash prefill kernel for {specialization:?}");
                let kernel = <B::Kernels as Kernels>::FlashPrefillKernel::new(context, specialization)
                    .map_err(Into::<Error>::into)?;
                entry.insert(kernel)
            },
        };

        let dispatch = FlashPrefillDispatch {
            queries,
            keys,
            values,
            output,
            log_sum_exp,
            batch,
            grid,
            sm_scale: self.options.scale_for(shape.head_dim_k),
            masking: MaskingPolicy::from_options(&self.options),
            kv_group_num: shape.num_heads / shape.num_kv_heads,
        };
        kernel.encode(context, dispatch).map_err(Into::<Error>::into)?;
        self.last_specialization.set(Some(*kernel.specialization()));
        Ok(())
    }

    fn validate<T>(
        &self,
        queries: &ArrayView3<'_, T>,
        keys: &ArrayView3<'_, T>,
        values: &ArrayView3<'_, T>,
        output: &ArrayViewMut3<'_, T>,
        log_sum_exp: Option<&ArrayViewMut2<'_, f32>>,
        batch: &BatchDescriptor,
    ) -> Result<ValidatedShape, Error> {
        let (q_tokens, num_heads, head_dim_k) = queries.dim();
        let (kv_tokens, num_kv_heads, key_head_dim) = keys.dim();
        let (value_tokens, value_kv_heads, head_dim_v) = values.dim();
        let (_, _, output_head_dim) = output.dim();

        if num_heads == 0 || num_kv_heads == 0 {
            return Err(ConfigError::ZeroHeads.into());
        }
        if head_dim_k == 0 || head_dim_v == 0 {
            return Err(ConfigError::ZeroHeadDim.into());
        }
        if key_head_dim != head_dim_k {
            return Err(ConfigError::HeadDimMismatch {
                query: head_dim_k,
                key: key_head_dim,
            }
            .into());
        }
        if value_kv_heads != num_kv_heads {
            return Err(ConfigError::KvHeadCountMismatch {
                keys: num_kv_heads,
                values: value_kv_heads,
            }
            .into());
        }
        if num_heads % num_kv_heads != 0 {
            return Err(ConfigError::IndivisibleHeads {
                num_heads,
                num_kv_heads,
            }
            .into());
        }
        if output_head_dim != head_dim_v {
            return Err(ConfigError::ValueHeadDimMismatch {
                value: head_dim_v,
                output: output_head_dim,
            }
            .into());
        }

        let expected_output = [q_tokens, num_heads, head_dim_v];
        if output.shape() != expected_output.as_slice() {
            return Err(PreconditionError::OutputShapeMismatch {
                expected: expected_output.to_vec(),
                actual: output.shape().to_vec(),
            }
            .into());
        }
        if let Some(log_sum_exp) = log_sum_exp {
            let expected_lse = [q_tokens, num_heads];
            if log_sum_exp.shape() != expected_lse.as_slice() {
                return Err(PreconditionError::LogSumExpShapeMismatch {
                    expected: expected_lse.to_vec(),
                    actual: log_sum_exp.shape().to_vec(),
                }
                .into());
            }
        }

        batch.validate(q_tokens, kv_tokens.min(value_tokens), self.options.causal)?;
        let actual_max = batch.max_q_seqlen();
        let max_q_seqlen = self.options.max_q_seqlen.unwrap_or(actual_max);
        if max_q_seqlen < actual_max {
            return Err(PreconditionError::MaxSeqLenTooSmall {
                declared: max_q_seqlen,
                actual: actual_max,
            }
            .into());
        }

        Ok(ValidatedShape {
            num_heads,
            num_kv_heads,
            head_dim_k,
            head_dim_v,
            max_q_seqlen,
        })
    }

    /// Tuning-table (or overridden) tile sizes, falling back once to the
    /// conservative configuration when the working set exceeds the budget.
    fn tile_configuration(
        &self,
        context: &B::Context,
        split: &HeadDimSplit,
        shared_kv: bool,
    ) -> Result<TileConfiguration, Error> {
        let configuration = self
            .options
            .tile_configuration
            .unwrap_or_else(|| context.tuning().tile_configuration(split.block_dk, shared_kv));
        if configuration.block_m == 0 || configuration.block_n == 0 {
            return Err(ConfigError::ZeroTileSize {
                block_m: configuration.block_m,
                block_n: configuration.block_n,
            }
            .into());
        }

        let budget = context.tile_memory_budget();
        let required_bytes = configuration.working_set_bytes(split, shared_kv);
        if required_bytes <= budget {
            debug!("Flash prefill tiles {configuration} ({required_bytes} bytes, shared kv: {shared_kv})");
            return Ok(configuration);
        }

        let fallback = TileConfiguration::CONSERVATIVE;
        let fallback_bytes = fallback.working_set_bytes(split, shared_kv);
        if configuration == fallback || fallback_bytes > budget {
            return Err(Error::HardwareUnsupported {
                configuration: fallback,
                required_bytes: fallback_bytes,
                available_bytes: budget,
            });
        }
        warn!(
            "Tile configuration {configuration} needs {required_bytes} bytes but the budget is {budget}, falling back to {fallback}"
        );
        Ok(fallback)
    }
}
