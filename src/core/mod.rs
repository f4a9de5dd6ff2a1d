//! Core data models: command table, templates and platform capability

mod command_table;
mod platform;
mod template;

pub use command_table::*;
pub use platform::*;
pub use template::*;
