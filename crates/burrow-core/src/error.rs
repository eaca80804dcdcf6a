//! Error types for the Burrow client library.

use std::time::Duration;

use thiserror::Error;

/// Result type alias using the Burrow [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Error taxonomy for Burrow operations.
///
/// Callers can match on the kind to distinguish "already gone" conditions
/// (handled as success by teardown paths) from real failures, instead of
/// string-matching error text.
#[derive(Debug, Error)]
pub enum Error {
    /// Agent binary provisioning failed after download retries were exhausted.
    #[error("Failed to install the agent binary: {0}")]
    Install(String),

    /// The agent exited or logged a fatal condition while starting.
    ///
    /// `message` embeds the agent's own error text and the tail of the
    /// captured startup logs; `logs` carries the raw lines.
    #[error("The agent process failed to start: {message}")]
    ProcessStart { message: String, logs: Vec<String> },

    /// No readiness signal arrived within the startup timeout.
    #[error("The agent process did not signal readiness within {timeout:?}; it has been terminated")]
    ProcessTimeout { timeout: Duration },

    /// A disallowed option was detected before any subprocess was spawned.
    #[error("Configuration error: {0}")]
    ConfigValidation(String),

    /// The control-plane returned a 4xx/5xx response.
    #[error("Control-plane request to {url} failed ({status}): {message}")]
    Http {
        status: u16,
        message: String,
        url: String,
    },

    /// Network-level failure reaching the control-plane.
    #[error("Failed to reach {url}: {reason}")]
    Transport { url: String, reason: String },

    /// The request URL uses a scheme outside the allow-list.
    #[error("URL scheme not allowed: {0}")]
    Security(String),

    /// The auth-token subcommand reported a failure, possibly with exit code 0.
    #[error("An error occurred when setting the auth token: {output}")]
    AuthToken { output: String },

    /// A one-shot agent subcommand exited unsuccessfully.
    #[error("Agent subcommand `{args}` failed: {output}")]
    Subcommand { args: String, output: String },

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether this error is an HTTP "not found" from the control-plane.
    ///
    /// Teardown paths treat this as "already gone" rather than a failure.
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::Http { status: 404, .. })
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn http_404_is_not_found() {
        let err = Error::Http {
            status: 404,
            message: "tunnel not found".into(),
            url: "http://127.0.0.1:4040/api/tunnels/x".into(),
        };
        assert!(err.is_not_found());
    }

    #[test]
    fn http_502_is_not_not_found() {
        let err = Error::Http {
            status: 502,
            message: "bad gateway".into(),
            url: "http://127.0.0.1:4040/api/tunnels".into(),
        };
        assert!(!err.is_not_found());
    }

    #[test]
    fn process_start_display_embeds_agent_text() {
        let err = Error::ProcessStart {
            message: "authentication failed: bad credentials".into(),
            logs: vec![],
        };
        assert!(err.to_string().contains("authentication failed"));
    }
}
