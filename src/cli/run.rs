//! `coderunner run`

use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Args;
use coderunner::{CommandTable, CompileOutcome, ProcessRunner, RunnerError};

use super::exit_codes;

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Source file to run
    pub file: PathBuf,

    /// Compile before running
    #[arg(long)]
    pub compile: bool,

    /// Text fed to the program's input, which is then closed
    #[arg(long)]
    pub input: Option<String>,

    /// Read the program's input from a file
    #[arg(long, conflicts_with = "input")]
    pub input_file: Option<PathBuf>,

    /// Terminate the program after this many seconds
    #[arg(long)]
    pub timeout: Option<f64>,

    /// Arguments passed to the program
    #[arg(last = true)]
    pub args: Vec<String>,
}

pub fn run(args: RunArgs, table: Arc<CommandTable>) -> anyhow::Result<i32> {
    let timeout = match args.timeout {
        Some(secs) if !secs.is_finite() || secs < 0.0 => bail!("Invalid timeout: {secs}"),
        Some(secs) => Some(Duration::from_secs_f64(secs)),
        None => None,
    };
    let input = match (&args.input, &args.input_file) {
        (Some(text), _) => Some(text.clone()),
        (None, Some(path)) => Some(
            std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read input {}", path.display()))?,
        ),
        (None, None) => None,
    };

    let mut runner = ProcessRunner::new(&args.file, table);

    if args.compile {
        if let CompileOutcome::Finished { exit_code, output } = runner.compile()? {
            eprint!("{output}");
            if exit_code != 0 {
                tracing::warn!(exit_code, "Compilation failed");
                return Ok(exit_code.max(exit_codes::UNEXPECTED_FAILURE));
            }
        }
    }

    runner.set_error_callback(|chunk| {
        let mut stderr = io::stderr().lock();
        let _ = stderr.write_all(chunk.as_bytes());
        let _ = stderr.flush();
    })?;

    let Some(pid) = runner.run(&args.args[..])? else {
        eprintln!("Nothing to run for {}", runner.source_paths().file);
        return Ok(exit_codes::SUCCESS);
    };
    tracing::debug!(pid, "Program started");

    match timeout {
        Some(timeout) => match runner.communicate(input.as_deref(), Some(timeout)) {
            Ok((stdout, _)) => print!("{stdout}"),
            Err(e @ RunnerError::Timeout(_)) => {
                runner.terminate();
                runner.wait_error_pump();
                return Err(e.into());
            }
            Err(e) => return Err(e.into()),
        },
        None => {
            if let Some(input) = &input {
                runner.write(input)?;
            }
            runner.close_input()?;
            stream_stdout(&mut runner)?;
        }
    }

    let code = loop {
        if let Some(code) = runner.is_stopped()? {
            break code;
        }
        thread::sleep(Duration::from_millis(10));
    };
    runner.wait_error_pump();

    Ok(if code < 0 {
        exit_codes::UNEXPECTED_FAILURE
    } else {
        code
    })
}

fn stream_stdout(runner: &mut ProcessRunner) -> anyhow::Result<()> {
    let mut stdout = io::stdout();
    loop {
        let chunk = runner.read(Some(4096))?;
        if chunk.is_empty() {
            return Ok(());
        }
        stdout.write_all(chunk.as_bytes())?;
        stdout.flush()?;
    }
}
