//! coderunner - compile and run single source files from the terminal
//!
//! Commands are looked up per file extension in a command table:
//! - `coderunner compile main.c` runs the compile step and prints its output
//! - `coderunner run main.py -- arg1 arg2` runs the program, streaming both streams
//! - `coderunner resolve main.rs --kind compile` prints the command line only

mod cli;
mod logging;

use clap::Parser;
use cli::{exit_codes, Cli, Commands};
use coderunner::{ConfigError, RunnerError};

fn main() {
    std::process::exit(run());
}

fn run() -> i32 {
    let cli = Cli::parse();

    // Initialize logging
    if let Err(e) = logging::init(cli.verbose, cli.json_output) {
        eprintln!("Failed to initialize logging: {}", e);
        return exit_codes::UNEXPECTED_FAILURE;
    }

    let table = match cli::load_table(cli.config.as_deref()) {
        Ok(table) => table,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            return categorize_error(&e);
        }
    };

    // Compilation runs on the blocking pool of a tokio runtime
    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create runtime: {}", e);
            return exit_codes::UNEXPECTED_FAILURE;
        }
    };

    let result = match cli.command {
        Commands::Compile(args) => rt.block_on(cli::compile::run(args, table, cli.json_output)),
        Commands::Run(args) => cli::run::run(args, table),
        Commands::Resolve(args) => cli::resolve::run(args, table, cli.json_output),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            categorize_error(&e)
        }
    }
}

/// Categorize an error into the appropriate exit code
fn categorize_error(e: &anyhow::Error) -> i32 {
    if let Some(err) = e.downcast_ref::<RunnerError>() {
        return match err {
            RunnerError::Unresolved { .. } => exit_codes::CONFIG_MISSING,
            RunnerError::SpawnFailed(_) => exit_codes::SPAWN_FAILED,
            RunnerError::Timeout(_) => exit_codes::TIMEOUT,
            _ => exit_codes::UNEXPECTED_FAILURE,
        };
    }

    if e.chain().any(|cause| cause.downcast_ref::<ConfigError>().is_some()) {
        exit_codes::CONFIG_MISSING
    } else {
        exit_codes::UNEXPECTED_FAILURE
    }
}
