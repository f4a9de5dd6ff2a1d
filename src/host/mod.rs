//! Host module for process management and command execution

mod error_pump;
mod process_runner;
mod spawn;
mod text_stream;

pub use error_pump::{ErrorCallback, ErrorPump, PumpState};
pub use process_runner::{CompileOutcome, ProcessRunner, Resolution, RunnerOptions};
pub use text_stream::{encode_for_child, TextDecoder, TextReader};
