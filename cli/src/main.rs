use std::process::ExitCode;

use clap::{CommandFactory, Parser, Subcommand};
use cli::handlers::{DeviceArgs, ProblemArgs, handle_bench, handle_tune, handle_verify};
use flashprefill::DeviceCapability;
use log::error;

#[derive(Parser)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Time prefill attention over a synthetic ragged batch
    Bench {
        #[command(flatten)]
        problem: ProblemArgs,
        #[command(flatten)]
        device: DeviceArgs,
        #[arg(long, default_value_t = 10)]
        iterations: u64,
        /// Write per-iteration results as JSON
        #[arg(long)]
        output_path: Option<String>,
    },
    /// Print the tile configurations chosen for a device capability
    Tune {
        #[arg(long)]
        capability: Option<DeviceCapability>,
        #[arg(long)]
        legacy_toolchain: bool,
    },
    /// Check the engine against the materialized reference
    Verify {
        #[command(flatten)]
        problem: ProblemArgs,
        #[command(flatten)]
        device: DeviceArgs,
        #[arg(long, default_value_t = 1e-3)]
        tolerance: f32,
    },
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    let result = match cli.command {
        Some(Commands::Bench {
            problem,
            device,
            iterations,
            output_path,
        }) => handle_bench(&problem, &device, iterations, output_path).map(|_| true),
        Some(Commands::Tune {
            capability,
            legacy_toolchain,
        }) => handle_tune(capability, legacy_toolchain).map(|_| true),
        Some(Commands::Verify {
            problem,
            device,
            tolerance,
        }) => handle_verify(&problem, &device, tolerance),
        None => {
            let mut cmd = Cli::command();
            cmd.print_help().map(|_| true).map_err(Into::into)
        },
    };

    match result {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(error) => {
            error!("{error}");
            eprintln!("{error}");
            ExitCode::FAILURE
        },
    }
}
