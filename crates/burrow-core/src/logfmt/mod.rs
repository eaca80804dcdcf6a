//! logfmt parsing for the agent's `--log=stdout` stream.

pub mod parser;
pub mod types;

pub use parser::parse_line;
pub use types::{LifecycleSignal, LogEvent, LogLevel};
