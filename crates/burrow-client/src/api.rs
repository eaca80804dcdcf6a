//! JSON request layer for the agent's local control-plane API.
//!
//! A thin, scheme-gated request/response abstraction: callers get parsed
//! JSON (or nothing, for deletes) and a structured error carrying the
//! remote's own error text for everything else.

use std::time::Duration;

use reqwest::{Method, StatusCode, Url};
use serde_json::Value;
use tracing::debug;

use burrow_core::{Error, Result};

/// URL schemes requests are allowed to use. Anything else is rejected
/// before any I/O happens.
const ALLOWED_SCHEMES: &[&str] = &["http", "https"];

/// Default per-request timeout when the caller does not supply one.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(4);

/// Client for the agent's control-plane HTTP API.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    default_timeout: Duration,
}

impl ApiClient {
    pub fn new(default_timeout: Duration) -> Result<Self> {
        // Ensure a TLS crypto provider is installed (reqwest uses rustls-no-provider).
        // The `Err` case just means it was already installed.
        let _ = rustls::crypto::ring::default_provider().install_default();

        let http = reqwest::Client::builder().build().map_err(|e| Error::Transport {
            url: String::new(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            http,
            default_timeout,
        })
    }

    /// Perform a JSON request.
    ///
    /// Returns `None` for a 2xx response with an empty body (the delete
    /// endpoints), otherwise the parsed JSON document. 4xx/5xx responses
    /// become [`Error::Http`] with the remote's message text; failures to
    /// reach the remote at all become [`Error::Transport`].
    pub async fn request(
        &self,
        url: &str,
        method: Method,
        params: &[(&str, &str)],
        body: Option<&Value>,
        timeout: Option<Duration>,
    ) -> Result<Option<Value>> {
        let parsed = Url::parse(url).map_err(|e| Error::Transport {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        if !ALLOWED_SCHEMES.contains(&parsed.scheme()) {
            return Err(Error::Security(format!(
                "scheme \"{}\" is not allowed: {url}",
                parsed.scheme()
            )));
        }

        debug!(%method, url, "control-plane request");
        let mut request = self
            .http
            .request(method, parsed)
            .timeout(timeout.unwrap_or(self.default_timeout));
        if !params.is_empty() {
            request = request.query(params);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|e| Error::Transport {
            url: url.to_string(),
            reason: error_chain(&e),
        })?;

        let status = response.status();
        let text = response.text().await.map_err(|e| Error::Transport {
            url: url.to_string(),
            reason: error_chain(&e),
        })?;

        if !status.is_success() {
            return Err(Error::Http {
                status: status.as_u16(),
                message: extract_error_message(&text, status),
                url: url.to_string(),
            });
        }

        if text.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(&text)?))
    }
}

/// Pull the remote's own error text out of an error-response body.
///
/// The control-plane reports errors as `{"msg": ..., "details": {"err": ...}}`;
/// non-JSON bodies fall back to the raw text, empty ones to the status reason.
fn extract_error_message(body: &str, status: StatusCode) -> String {
    if let Ok(value) = serde_json::from_str::<Value>(body) {
        let msg = value.get("msg").and_then(Value::as_str).unwrap_or_default();
        let detail = value
            .get("details")
            .and_then(|d| d.get("err"))
            .and_then(Value::as_str);
        match (msg.is_empty(), detail) {
            (false, Some(err)) => return format!("{msg}: {err}"),
            (false, None) => return msg.to_string(),
            (true, Some(err)) => return err.to_string(),
            (true, None) => {}
        }
    }
    if body.trim().is_empty() {
        status.canonical_reason().unwrap_or("Unknown").to_string()
    } else {
        body.trim().to_string()
    }
}

/// Walk the `source()` chain of an error and join into a single string.
fn error_chain(err: &dyn std::error::Error) -> String {
    let mut chain = vec![err.to_string()];
    let mut current = err.source();
    while let Some(e) = current {
        chain.push(e.to_string());
        current = e.source();
    }
    chain.join(" -> ")
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn file_scheme_rejected_before_any_io() {
        let client = ApiClient::new(DEFAULT_REQUEST_TIMEOUT).unwrap();
        let err = client
            .request("file:///etc/passwd", Method::GET, &[], None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Security(_)));
    }

    #[tokio::test]
    async fn ftp_scheme_rejected() {
        let client = ApiClient::new(DEFAULT_REQUEST_TIMEOUT).unwrap();
        let err = client
            .request("ftp://127.0.0.1/pub", Method::GET, &[], None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Security(_)));
    }

    #[tokio::test]
    async fn unparseable_url_is_transport_error() {
        let client = ApiClient::new(DEFAULT_REQUEST_TIMEOUT).unwrap();
        let err = client
            .request("not a url", Method::GET, &[], None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Transport { .. }));
    }

    #[test]
    fn error_message_combines_msg_and_detail() {
        let body = r#"{"error_code":102,"status_code":400,"msg":"invalid tunnel configuration","details":{"err":"protocol name \"bogus\" is unknown"}}"#;
        let message = extract_error_message(body, StatusCode::BAD_REQUEST);
        assert!(message.contains("invalid tunnel configuration"));
        assert!(message.contains("protocol name"));
    }

    #[test]
    fn error_message_falls_back_to_raw_body() {
        let message = extract_error_message("tunnel session limit reached", StatusCode::BAD_GATEWAY);
        assert_eq!(message, "tunnel session limit reached");
    }

    #[test]
    fn error_message_falls_back_to_status_reason() {
        let message = extract_error_message("", StatusCode::NOT_FOUND);
        assert_eq!(message, "Not Found");
    }
}
