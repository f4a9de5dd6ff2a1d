//! coderunner - compile and run single source files as managed child processes
//!
//! A [`ProcessRunner`] resolves compile/run commands from a per-extension
//! [`CommandTable`], launches the program in the source file's directory,
//! streams its stdout to the caller and its stderr to a callback, and
//! terminates it together with everything it spawned.

pub mod core;
pub mod error;
pub mod host;

pub use crate::core::{
    format_arg_list, CommandKind, CommandRule, CommandTable, FixedPlatform, HostPlatform, Lookup,
    Platform, SourcePaths,
};
pub use error::{ConfigError, Result, RunnerError};
pub use host::{CompileOutcome, ErrorCallback, ProcessRunner, Resolution, RunnerOptions};
