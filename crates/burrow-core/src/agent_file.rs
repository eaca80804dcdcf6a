//! The agent's on-disk YAML configuration file.
//!
//! The file format belongs to the agent; this module only reads the few
//! pieces the supervisor needs (validation inputs, named tunnel
//! definitions), provisions a minimal default, and rewrites the
//! `authtoken` field in place. Unknown keys round-trip untouched.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Top-level view of the agent's YAML configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authtoken: Option<String>,
    /// Control-plane bind address, or `false` to disable it entirely.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub web_addr: Option<serde_yaml::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    /// Named tunnel definitions.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tunnels: BTreeMap<String, TunnelDefinition>,
    /// Options this library does not interpret, preserved on rewrite.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

/// A named tunnel definition under the `tunnels:` mapping.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TunnelDefinition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proto: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub addr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schemes: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subdomain: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

impl AgentFile {
    /// Look up a named tunnel definition.
    pub fn tunnel_definition(&self, name: &str) -> Option<&TunnelDefinition> {
        self.tunnels.get(name)
    }
}

/// Read the agent config file. A missing file is an empty config.
pub fn load(path: &Path) -> Result<AgentFile> {
    if !path.exists() {
        return Ok(AgentFile::default());
    }
    let content = std::fs::read_to_string(path)?;
    Ok(serde_yaml::from_str(&content)?)
}

/// Write the config back, preserving unknown keys captured at load.
pub fn save(path: &Path, file: &AgentFile) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_yaml::to_string(file)?)?;
    Ok(())
}

/// Provision a minimal valid config file if none exists.
pub fn write_default(path: &Path) -> Result<()> {
    if path.exists() {
        return Ok(());
    }
    save(path, &AgentFile::default())
}

/// Rewrite the `authtoken` field in place, leaving everything else as is.
pub fn set_auth_token(path: &Path, token: &str) -> Result<()> {
    let mut file = load(path)?;
    file.authtoken = Some(token.to_string());
    save(path, &file)
}

/// Reject effective configuration values incompatible with supervision.
///
/// These must fail before the agent is ever spawned: a disabled
/// control-plane leaves nothing to manage tunnels through, a `json` log
/// format defeats the logfmt watchdog, and a raised log level suppresses
/// the readiness line the watchdog blocks on.
pub fn validate(file: &AgentFile) -> Result<()> {
    if file.web_addr == Some(serde_yaml::Value::Bool(false)) {
        return Err(Error::ConfigValidation(
            "web_addr cannot be false, the agent's control-plane API is required".into(),
        ));
    }
    if let Some(format) = file.log_format.as_deref() {
        if format == "json" {
            return Err(Error::ConfigValidation(
                "log_format \"json\" is not supported, the log stream must be logfmt".into(),
            ));
        }
    }
    if let Some(level) = file.log_level.as_deref() {
        if matches!(level, "warn" | "error" | "crit") {
            return Err(Error::ConfigValidation(format!(
                "log_level \"{level}\" would suppress the readiness line"
            )));
        }
    }
    Ok(())
}
