//! Launch configuration for a supervised agent process.

use std::path::PathBuf;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::logfmt::LogEvent;

/// Environment variable collaborators and tests use to supply an auth
/// token. The core never reads it.
pub const AUTHTOKEN_ENV: &str = "BURROW_AUTHTOKEN";

/// Immutable launch configuration for one supervised agent process.
///
/// Two configs address the same process iff their binary path and config
/// path match (see [`ProcessKey`]); every other field only affects the
/// launch it is passed to.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Path to the agent binary.
    pub binary_path: PathBuf,
    /// Path to the agent's YAML configuration file.
    pub config_path: PathBuf,
    /// Region the agent should home to (`--region`).
    pub region: Option<String>,
    /// Auth token passed on the command line (`--authtoken`).
    pub auth_token: Option<String>,
    /// How long to wait for the readiness signal before tearing down.
    pub startup_timeout: Duration,
    /// Per-request timeout for control-plane API calls.
    pub request_timeout: Duration,
    /// Capacity of the rolling buffer of recent log events.
    pub max_log_lines: usize,
    /// Optional sink receiving every parsed log event from the watchdog.
    pub log_events: Option<mpsc::Sender<LogEvent>>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            binary_path: default_binary_path(),
            config_path: default_config_path(),
            region: None,
            auth_token: None,
            startup_timeout: Duration::from_secs(15),
            request_timeout: Duration::from_secs(4),
            max_log_lines: 100,
            log_events: None,
        }
    }
}

impl AgentConfig {
    /// Registry identity of the process this config addresses.
    pub fn key(&self) -> ProcessKey {
        ProcessKey {
            binary_path: self.binary_path.clone(),
            config_path: self.config_path.clone(),
        }
    }
}

/// Registry key identifying a supervised process: the (binary path,
/// config path) pair. Everything else about a launch is not identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProcessKey {
    binary_path: PathBuf,
    config_path: PathBuf,
}

impl std::fmt::Display for ProcessKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} ({})",
            self.binary_path.display(),
            self.config_path.display()
        )
    }
}

/// Default location of the agent binary.
pub fn default_binary_path() -> PathBuf {
    let name = if cfg!(windows) { "burrow.exe" } else { "burrow" };
    burrow_dir().join("bin").join(name)
}

/// Default location of the agent's YAML configuration file.
pub fn default_config_path() -> PathBuf {
    burrow_dir().join("burrow.yml")
}

fn burrow_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("burrow")
}
