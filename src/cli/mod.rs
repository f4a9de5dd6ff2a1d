//! Command-line interface for running source files outside an editor

pub mod compile;
pub mod resolve;
pub mod run;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use coderunner::CommandTable;

/// Process exit codes
pub mod exit_codes {
    pub const SUCCESS: i32 = 0;
    pub const UNEXPECTED_FAILURE: i32 = 1;
    /// No command configured for the file type, or the table failed to load
    pub const CONFIG_MISSING: i32 = 2;
    pub const SPAWN_FAILED: i32 = 3;
    pub const TIMEOUT: i32 = 4;
}

#[derive(Debug, Parser)]
#[command(name = "coderunner", version, about = "Compile and run single source files")]
pub struct Cli {
    /// Command table (.toml or .json). Defaults to the user config file, then built-in rules
    #[arg(long, global = true, env = "CODERUNNER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs and results as JSON
    #[arg(long = "json", global = true)]
    pub json_output: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the compile command for a source file
    Compile(compile::CompileArgs),
    /// Run a source file, streaming its output
    Run(run::RunArgs),
    /// Print the command that would be executed
    Resolve(resolve::ResolveArgs),
}

/// Load the command table from `config`, the user config file, or built-ins
pub fn load_table(config: Option<&Path>) -> anyhow::Result<Arc<CommandTable>> {
    if let Some(path) = config {
        let table = CommandTable::load(path)
            .with_context(|| format!("Failed to load command table {}", path.display()))?;
        return Ok(Arc::new(table));
    }

    if let Some(path) = CommandTable::default_path().filter(|p| p.exists()) {
        let table = CommandTable::load(&path)
            .with_context(|| format!("Failed to load command table {}", path.display()))?;
        return Ok(Arc::new(table));
    }

    tracing::debug!("Using built-in command table");
    Ok(Arc::new(CommandTable::builtin()))
}
