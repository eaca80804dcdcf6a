//! Burrow Core Library
//!
//! Shared functionality for Burrow components:
//! - logfmt parsing for the agent's `--log=stdout` stream
//! - Launch configuration and the agent's on-disk YAML file
//! - Common error types

pub mod agent_file;
pub mod config;
pub mod error;
pub mod logfmt;
pub mod tracing_init;

pub use config::{AgentConfig, ProcessKey};
pub use error::{Error, Result};
pub use logfmt::{LifecycleSignal, LogEvent, LogLevel};
