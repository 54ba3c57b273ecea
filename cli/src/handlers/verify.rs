use std::error::Error;

use console::Style;
use flashprefill::{
    ArrayElement, Context, Cpu, CpuContext, DataType, FlashPrefill, FlashPrefillArguments,
    reference::reference_attention,
};
use half::{bf16, f16};
use ndarray::Array3;

use super::{DeviceArgs, ProblemArgs};

/// Compares the engine against the materialized reference. Returns whether
/// the maximum absolute error stayed within `tolerance`.
pub fn handle_verify(
    problem: &ProblemArgs,
    device: &DeviceArgs,
    tolerance: f32,
) -> Result<bool, Box<dyn Error>> {
    match problem.data_type() {
        DataType::F32 => verify::<f32>(problem, device, tolerance),
        DataType::F16 => verify::<f16>(problem, device, tolerance),
        DataType::BF16 => verify::<bf16>(problem, device, tolerance),
    }
}

fn verify<T: ArrayElement>(
    problem: &ProblemArgs,
    device: &DeviceArgs,
    tolerance: f32,
) -> Result<bool, Box<dyn Error>> {
    let config = problem.attention_config()?;
    let options = problem.options(&config);
    let context = CpuContext::new(device.device_config()?)?;
    let inputs = problem.synthesize::<T>(&config)?;

    let mut output = Array3::from_elem(
        (inputs.batch.total_q_tokens(), config.num_heads, config.value_head_dim()),
        T::from_f32(0.0),
    );
    let operator = FlashPrefill::<Cpu>::new(T::data_type(), options);
    operator.forward(
        &context,
        FlashPrefillArguments {
            queries: inputs.queries.view(),
            keys: inputs.keys.view(),
            values: inputs.values.view(),
            output: output.view_mut(),
            log_sum_exp: None,
            batch: &inputs.batch,
        },
    )?;
    let tiles = operator
        .last_specialization()
        .map_or_else(|| "-".to_string(), |specialization| specialization.tile_configuration.to_string());
    let expected = reference_attention(
        inputs.queries.view(),
        inputs.keys.view(),
        inputs.values.view(),
        &inputs.batch,
        &options,
    )?
    .output;

    let scale = expected.iter().fold(0.0f32, |max, value| max.max(value.abs())).max(f32::MIN_POSITIVE);
    let max_abs_error = output
        .iter()
        .zip(expected.iter())
        .map(|(actual, expected)| (actual.to_f32() - expected).abs())
        .fold(0.0f32, f32::max);
    let passed = max_abs_error <= tolerance;

    println!(
        "{} on {} threads, tiles {}",
        T::data_type(),
        context.num_threads(),
        tiles
    );
    println!("Max abs error: {max_abs_error:.3e}");
    println!("Max rel error: {:.3e}", max_abs_error / scale);
    let verdict = if passed {
        Style::new().green().bold().apply_to("PASS")
    } else {
        Style::new().red().bold().apply_to("FAIL")
    };
    println!("{verdict} (tolerance {tolerance:.1e})");

    Ok(passed)
}
