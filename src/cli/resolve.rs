//! `coderunner resolve`

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, ValueEnum};
use coderunner::{
    format_arg_list, CommandKind, CommandTable, ProcessRunner, Resolution, RunnerError,
};

use super::exit_codes;

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum KindArg {
    Compile,
    Run,
}

impl From<KindArg> for CommandKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Compile => CommandKind::Compile,
            KindArg::Run => CommandKind::Run,
        }
    }
}

#[derive(Debug, Args)]
pub struct ResolveArgs {
    /// Source file
    pub file: PathBuf,

    /// Which template to resolve
    #[arg(long, value_enum, default_value_t = KindArg::Run)]
    pub kind: KindArg,

    /// Quote arguments the way the editor does instead of joining with spaces
    #[arg(long)]
    pub quote_args: bool,

    /// Arguments substituted for {args}
    #[arg(last = true)]
    pub args: Vec<String>,
}

pub fn run(args: ResolveArgs, table: Arc<CommandTable>, json: bool) -> anyhow::Result<i32> {
    let kind = CommandKind::from(args.kind);
    let runner = ProcessRunner::new(&args.file, table);
    let arg_string = if args.quote_args {
        format_arg_list(&args.args[..])
    } else {
        args.args.join(" ")
    };

    match runner.resolve_command(kind, &arg_string) {
        Resolution::Unresolved => Err(RunnerError::Unresolved {
            kind,
            extension: runner.source_paths().extension.clone(),
        }
        .into()),
        Resolution::NoOp => {
            if json {
                println!("{}", serde_json::json!({ "kind": kind, "status": "no_op" }));
            } else {
                eprintln!("No {kind} command for {}", runner.source_paths().file);
            }
            Ok(exit_codes::SUCCESS)
        }
        Resolution::Command(command) => {
            if json {
                println!(
                    "{}",
                    serde_json::json!({ "kind": kind, "status": "command", "command": command })
                );
            } else {
                println!("{command}");
            }
            Ok(exit_codes::SUCCESS)
        }
    }
}
