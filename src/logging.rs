//! Logging configuration using tracing
//!
//! Logs go to stderr, interleaved with the child's error stream when running.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Filter used when neither `--verbose` nor `RUST_LOG` is given
const DEFAULT_FILTER: &str = "coderunner=info,warn";

/// Initialize the logging system
pub fn init(verbose: bool, json: bool) -> anyhow::Result<()> {
    let filter = if verbose {
        EnvFilter::new("coderunner=debug,info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
    };

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()?;
    } else {
        registry
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .try_init()?;
    }

    Ok(())
}
