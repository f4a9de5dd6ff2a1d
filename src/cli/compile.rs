//! `coderunner compile`

use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use coderunner::{CommandKind, CommandTable, CompileOutcome, ProcessRunner, RunnerError};

use super::exit_codes;

#[derive(Debug, Args)]
pub struct CompileArgs {
    /// Source file to compile
    pub file: PathBuf,
}

/// Compile and return the compiler's exit code
pub async fn run(args: CompileArgs, table: Arc<CommandTable>, json: bool) -> anyhow::Result<i32> {
    let runner = ProcessRunner::new(&args.file, table);
    let outcome = runner.compile_async().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    }

    match outcome {
        CompileOutcome::Unresolved => Err(RunnerError::Unresolved {
            kind: CommandKind::Compile,
            extension: runner.source_paths().extension.clone(),
        }
        .into()),
        CompileOutcome::NoOp => {
            if !json {
                eprintln!("Nothing to compile for {}", runner.source_paths().file);
            }
            Ok(exit_codes::SUCCESS)
        }
        CompileOutcome::Finished { exit_code, output } => {
            if !json {
                print!("{output}");
            }
            Ok(if exit_code < 0 {
                exit_codes::UNEXPECTED_FAILURE
            } else {
                exit_code
            })
        }
    }
}
