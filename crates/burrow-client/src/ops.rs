//! One-shot agent subcommands: version, auth token, update.
//!
//! These shell out to the agent binary without going through the
//! supervisor; no long-lived process or watchdog is involved.

use tokio::process::Command;
use tracing::{debug, info};

use burrow_core::{AgentConfig, Error, Result, agent_file};

/// Version of this library, reported alongside the agent's.
pub const LIBRARY_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prefix the agent prints before its version number.
const VERSION_PREFIX: &str = "burrow version ";

/// Marker scanned for in captured output. Some agent failures exit 0 and
/// report only through text.
const ERROR_MARKER: &str = "error";

/// Agent and library version pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Versions {
    pub agent: String,
    pub library: String,
}

impl Versions {
    /// The agent version parsed as semver, when it is one.
    pub fn agent_semver(&self) -> Option<semver::Version> {
        semver::Version::parse(&self.agent).ok()
    }
}

/// Report the installed agent's version and this library's version.
pub async fn get_version(config: &AgentConfig) -> Result<Versions> {
    let output = capture_run(config, &["--version"]).await?;
    let agent = output
        .strip_prefix(VERSION_PREFIX)
        .unwrap_or(&output)
        .trim()
        .to_string();
    Ok(Versions {
        agent,
        library: LIBRARY_VERSION.to_string(),
    })
}

/// Set the agent auth token and rewrite the config file in place.
///
/// The captured output is scanned for an error marker even on a zero
/// exit; only a clean run updates the `authtoken` field on disk.
pub async fn set_auth_token(config: &AgentConfig, token: &str) -> Result<()> {
    let config_path = config.config_path.to_string_lossy().to_string();
    let args = [
        "config",
        "add-authtoken",
        token,
        "--log=stdout",
        "--config",
        config_path.as_str(),
    ];

    let output = match capture_run(config, &args).await {
        Ok(output) => output,
        Err(Error::Subcommand { output, .. }) => return Err(Error::AuthToken { output }),
        Err(e) => return Err(e),
    };
    if output_reports_error(&output) {
        return Err(Error::AuthToken { output });
    }

    agent_file::set_auth_token(&config.config_path, token)?;
    info!(config = %config.config_path.display(), "auth token saved");
    Ok(())
}

/// Update the agent binary in place via its own updater. Returns the
/// updater's output.
pub async fn update(config: &AgentConfig) -> Result<String> {
    let output = capture_run(config, &["update", "--log=stdout"]).await?;
    if output_reports_error(&output) {
        return Err(Error::Subcommand {
            args: "update".into(),
            output,
        });
    }
    Ok(output)
}

/// Run the agent binary with `args` and capture combined output.
async fn capture_run(config: &AgentConfig, args: &[&str]) -> Result<String> {
    debug!(binary = %config.binary_path.display(), ?args, "running agent subcommand");
    let output = Command::new(&config.binary_path).args(args).output().await?;

    let mut text = String::from_utf8_lossy(&output.stdout).trim().to_string();
    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stderr.trim().is_empty() {
        if !text.is_empty() {
            text.push('\n');
        }
        text.push_str(stderr.trim());
    }

    if !output.status.success() {
        return Err(Error::Subcommand {
            args: args.join(" "),
            output: text,
        });
    }
    Ok(text)
}

fn output_reports_error(output: &str) -> bool {
    output.to_lowercase().contains(ERROR_MARKER)
}
