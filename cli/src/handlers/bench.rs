use std::{error::Error, fs, time::Instant};

use comfy_table::{CellAlignment, ContentArrangement, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};
use console::Style;
use flashprefill::{
    ArrayElement, Context, Cpu, CpuContext, DataType, FlashPrefill, FlashPrefillArguments, TileConfiguration,
};
use half::{bf16, f16};
use indicatif::ProgressBar;
use log::info;
use ndarray::Array3;
use serde::Serialize;

use super::{DeviceArgs, ProblemArgs};

#[derive(Debug, Serialize)]
struct BenchResult {
    iteration: u64,
    duration: f64,
    tokens_per_second: f64,
}

#[derive(Debug, Serialize)]
struct BenchReport {
    data_type: DataType,
    num_threads: usize,
    tile_configuration: TileConfiguration,
    shared_kv: bool,
    input_bytes: usize,
    q_seqlens: Vec<usize>,
    history: usize,
    results: Vec<BenchResult>,
}

pub fn handle_bench(
    problem: &ProblemArgs,
    device: &DeviceArgs,
    iterations: u64,
    output_path: Option<String>,
) -> Result<(), Box<dyn Error>> {
    match problem.data_type() {
        DataType::F32 => run_bench::<f32>(problem, device, iterations, output_path),
        DataType::F16 => run_bench::<f16>(problem, device, iterations, output_path),
        DataType::BF16 => run_bench::<bf16>(problem, device, iterations, output_path),
    }
}

fn run_bench<T: ArrayElement>(
    problem: &ProblemArgs,
    device: &DeviceArgs,
    iterations: u64,
    output_path: Option<String>,
) -> Result<(), Box<dyn Error>> {
    let config = problem.attention_config()?;
    let context = CpuContext::new(device.device_config()?)?;
    let inputs = problem.synthesize::<T>(&config)?;
    let operator = FlashPrefill::<Cpu>::new(T::data_type(), problem.options(&config));
    let total_tokens = problem.total_tokens();

    let mut output = Array3::from_elem((total_tokens, config.num_heads, config.value_head_dim()), T::from_f32(0.0));
    let mut forward = || {
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
        )
    };

    let title = Style::new().bold();
    println!(
        "{}",
        title.apply_to(format!(
            "{} sequences, {} query tokens, {}",
            problem.seqlens.len(),
            total_tokens,
            T::data_type()
        ))
    );

    // The first call builds the kernel specialization.
    forward()?;
    let specialization = operator.last_specialization().ok_or("warm-up call did not record a specialization")?;
    info!("Warm-up done, running {iterations} iterations");

    let progress_bar = ProgressBar::new(iterations);
    progress_bar.set_position(0);
    let mut results = Vec::with_capacity(iterations as usize);
    for iteration in 0..iterations {
        let start = Instant::now();
        forward()?;
        let duration = start.elapsed().as_secs_f64();
        results.push(BenchResult {
            iteration,
            duration,
            tokens_per_second: total_tokens as f64 / duration,
        });
        progress_bar.inc(1);
    }
    progress_bar.finish();

    let input_elements = inputs.queries.len() + inputs.keys.len() + inputs.values.len();
    let report = BenchReport {
        data_type: T::data_type(),
        num_threads: context.num_threads(),
        tile_configuration: specialization.tile_configuration,
        shared_kv: specialization.shared_kv,
        input_bytes: input_elements * T::data_type().size_in_bytes(),
        q_seqlens: problem.seqlens.clone(),
        history: problem.history,
        results,
    };
    if let Some(output_path) = output_path {
        fs::write(output_path, serde_json::to_string_pretty(&report)?)?;
    }

    let latency_metric =
        calculate_metric(report.results.iter().map(|result| result.duration * 1000.0).collect::<Vec<f64>>());
    let tokens_per_second_metric =
        calculate_metric(report.results.iter().map(|result| result.tokens_per_second).collect::<Vec<f64>>());
    let threads = report.num_threads.to_string();
    let tiles = report.tile_configuration.to_string();
    let inputs_size = format!("{:.3}", report.input_bytes as f64 / 1024.0 / 1024.0);

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["Metric", "Value"])
        .add_row(vec!["Threads", threads.as_str()])
        .add_row(vec!["Tiles", tiles.as_str()])
        .add_row(vec!["Inputs, MiB", inputs_size.as_str()])
        .add_row(vec!["Latency, ms", latency_metric.as_str()])
        .add_row(vec!["Prefill, t/s", tokens_per_second_metric.as_str()]);
    if let Some(column) = table.column_mut(1) {
        column.set_cell_alignment(CellAlignment::Right);
    }
    println!("{table}");

    Ok(())
}

fn calculate_metric(data: Vec<f64>) -> String {
    if let (Some(mean), Some(std_dev)) = (mean(&data), std_dev(&data)) {
        format!("{:.3} ± {:.3}", mean, std_dev)
    } else if let Some(mean) = mean(&data) {
        format!("{:.3}", mean)
    } else {
        "-".to_string()
    }
}

fn mean(data: &[f64]) -> Option<f64> {
    if data.is_empty() {
        return None;
    }

    Some(data.iter().sum::<f64>() / data.len() as f64)
}

fn std_dev(data: &[f64]) -> Option<f64> {
    let n = data.len();
    if n < 2 {
        return None;
    }

    let mean = mean(data)?;
    let variance = data
        .iter()
        .map(|x| {
            let diff = x - mean;
            diff * diff
        })
        .sum::<f64>()
        / (n as f64 - 1.0);

    Some(variance.sqrt())
}
