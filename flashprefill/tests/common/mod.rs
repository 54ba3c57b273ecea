#![allow(dead_code)]
use std::rc::Rc;

use flashprefill::{
    ArrayElement, Context, Cpu, CpuContext, DeviceConfig, FlashPrefill, FlashPrefillArguments, flash_attention_forward,
    kernel::{AttentionOptions, BatchDescriptor, KvLayout},
    reference::{ReferenceOutput, reference_attention},
};
use ndarray::{Array2, Array3, ArrayView3};
use rand::{Rng, SeedableRng, rngs::StdRng};

/// Packed `shd` tensors of a ragged batch.
pub struct Problem {
    pub queries: Array3<f32>,
    pub keys: Array3<f32>,
    pub values: Array3<f32>,
    pub batch: BatchDescriptor,
}

impl Problem {
    pub fn new(
        seed: u64,
        q_seqlens: &[usize],
        kv_seqlens: &[usize],
        num_heads: usize,
        num_kv_heads: usize,
        head_dim_k: usize,
        head_dim_v: usize,
    ) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let q_tokens = q_seqlens.iter().sum();
        let kv_tokens = kv_seqlens.iter().sum();
        Self {
            queries: random_tensor(&mut rng, (q_tokens, num_heads, head_dim_k)),
            keys: random_tensor(&mut rng, (kv_tokens, num_kv_heads, head_dim_k)),
            values: random_tensor(&mut rng, (kv_tokens, num_kv_heads, head_dim_v)),
            batch: BatchDescriptor::packed(q_seqlens, kv_seqlens).unwrap(),
        }
    }

    pub fn num_heads(&self) -> usize {
        self.queries.dim().1
    }

    pub fn head_dim_v(&self) -> usize {
        self.values.dim().2
    }

    pub fn output_shape(&self) -> (usize, usize, usize) {
        (self.queries.dim().0, self.num_heads(), self.head_dim_v())
    }
}

pub fn random_tensor(
    rng: &mut StdRng,
    shape: (usize, usize, usize),
) -> Array3<f32> {
    Array3::from_shape_simple_fn(shape, || rng.random_range(-1.0f32..1.0f32))
}

/// Copy of an `shd` tensor laid out as `hsd`.
pub fn to_hsd(tensor: &Array3<f32>) -> Array3<f32> {
    tensor.view().permuted_axes([1, 0, 2]).as_standard_layout().into_owned()
}

pub fn cast<T: ArrayElement>(tensor: &Array3<f32>) -> Array3<T> {
    tensor.mapv(T::from_f32)
}

pub fn widen<T: ArrayElement>(tensor: ArrayView3<'_, T>) -> Array3<f32> {
    tensor.mapv(T::to_f32)
}

pub fn shd_options() -> AttentionOptions {
    AttentionOptions::default().with_kv_layout(KvLayout::Shd)
}

pub fn context() -> Rc<CpuContext> {
    CpuContext::new(DeviceConfig::default().with_num_threads(4)).unwrap()
}

pub fn context_with(config: DeviceConfig) -> Rc<CpuContext> {
    CpuContext::new(config).unwrap()
}

pub fn run(
    context: &CpuContext,
    problem: &Problem,
    options: &AttentionOptions,
) -> Array3<f32> {
    let mut output = Array3::zeros(problem.output_shape());
    flash_attention_forward(
        context,
        problem.queries.view(),
        problem.keys.view(),
        problem.values.view(),
        output.view_mut(),
        &problem.batch,
        options,
    )
    .unwrap();
    output
}

pub fn run_with_log_sum_exp(
    context: &CpuContext,
    problem: &Problem,
    batch: &BatchDescriptor,
    options: &AttentionOptions,
) -> (Array3<f32>, Array2<f32>) {
    let mut output = Array3::zeros(problem.output_shape());
    let mut log_sum_exp = Array2::zeros((problem.queries.dim().0, problem.num_heads()));
    let operator = FlashPrefill::<Cpu>::new(f32::data_type(), *options);
    operator
        .forward(
            context,
            FlashPrefillArguments {
                queries: problem.queries.view(),
                keys: problem.keys.view(),
                values: problem.values.view(),
                output: output.view_mut(),
                log_sum_exp: Some(log_sum_exp.view_mut()),
                batch,
            },
        )
        .unwrap();
    (output, log_sum_exp)
}

pub fn reference(
    problem: &Problem,
    options: &AttentionOptions,
) -> ReferenceOutput {
    reference_attention(problem.queries.view(), problem.keys.view(), problem.values.view(), &problem.batch, options)
        .unwrap()
}

pub fn max_abs_diff(
    actual: &Array3<f32>,
    expected: &Array3<f32>,
) -> f32 {
    assert_eq!(actual.dim(), expected.dim());
    actual.iter().zip(expected.iter()).map(|(a, b)| (a - b).abs()).fold(0.0, f32::max)
}

pub fn assert_close(
    actual: &Array3<f32>,
    expected: &Array3<f32>,
    tolerance: f32,
) {
    let diff = max_abs_diff(actual, expected);
    assert!(diff <= tolerance, "max abs diff {diff} exceeds {tolerance}");
}
