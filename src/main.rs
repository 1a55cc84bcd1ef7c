//! latpart command line entry point.
//!
//! ```text
//! latpart [OPTIONS] <output_path> <architecture_name> <allocation_name> (<task_name> <parameter_name>)+
//! ```
//!
//! `output_path` selects where the run report goes: the literal `stdout`
//! writes to standard output, any other value names a file that is created
//! or truncated. The remaining positional arguments name the architecture,
//! the processor allocation and the task/parameter file pairs, resolved
//! under the input root by the conventional directory layout.

use clap::Parser;
use latpart::pipeline::{self, PipelineConfig, TaskRequest};
use latpart::support;
use std::fs::File;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "latpart")]
#[command(about = "Lattice-based memory bank partitioning for concurrent loop nests")]
#[command(version)]
struct Args {
    /// Root directory of the input tree (Architectures/, Allocations/,
    /// Sources/, Lattices/).
    #[arg(long, default_value = ".")]
    input_root: PathBuf,

    /// Directory holding the MILP model file; solver data and reports are
    /// written next to it.
    #[arg(long, default_value = "MLP")]
    milp_dir: PathBuf,

    /// Time limit in seconds handed to the MILP solver.
    #[arg(long)]
    milp_time_limit: Option<u64>,

    /// Output stream: `stdout` or a file to create.
    output_path: String,

    /// Name of the architecture description.
    architecture_name: String,

    /// Name of the processor allocation.
    allocation_name: String,

    /// Alternating task and parameter file names, one pair per task.
    #[arg(required = true, num_args = 1..)]
    tasks_and_parameters: Vec<String>,
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();

    let mut stream: Box<dyn Write> = if args.output_path == "stdout" {
        Box::new(io::stdout())
    } else {
        match File::create(&args.output_path) {
            Ok(file) => Box::new(file),
            Err(failure) => {
                eprintln!("Cannot create the output file: {failure}");
                return ExitCode::FAILURE;
            }
        }
    };

    if args.tasks_and_parameters.len() % 2 != 0 {
        let _ = support::error(
            &mut *stream,
            "For each source file must be provided a parameter file",
        );
        return ExitCode::FAILURE;
    }

    let requests: Vec<TaskRequest> = args
        .tasks_and_parameters
        .chunks(2)
        .map(|pair| TaskRequest {
            task_name: pair[0].clone(),
            parameter_name: pair[1].clone(),
        })
        .collect();

    let config = PipelineConfig {
        input_root: args.input_root,
        milp_dir: args.milp_dir,
        milp_time_limit: args.milp_time_limit,
    };

    match pipeline::run(
        &mut *stream,
        &config,
        &args.architecture_name,
        &args.allocation_name,
        &requests,
    ) {
        Ok(best_lattice) => {
            let _ = support::news(&mut *stream, "Operation completed successfully");
            let _ = support::news(
                &mut *stream,
                &format!(
                    "The best allocation is the one corresponding to the lattice number {best_lattice}"
                ),
            );
            ExitCode::SUCCESS
        }
        Err(_) => {
            // The failing stage has already reported itself on the stream.
            ExitCode::FAILURE
        }
    }
}
