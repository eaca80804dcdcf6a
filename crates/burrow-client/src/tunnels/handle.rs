//! Tunnel handles and open specifications.

use serde::Deserialize;
use serde_json::{Map, Value};

/// Legacy bind flag selecting which schemes an HTTP tunnel listens on.
/// Mutually exclusive with an explicit scheme list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindTls {
    HttpOnly,
    HttpsOnly,
    Both,
}

impl BindTls {
    pub(crate) fn schemes(self) -> Vec<String> {
        match self {
            Self::HttpOnly => vec!["http".into()],
            Self::HttpsOnly => vec!["https".into()],
            Self::Both => vec!["http".into(), "https".into()],
        }
    }
}

/// Specification for opening a tunnel.
#[derive(Debug, Clone, Default)]
pub struct TunnelSpec {
    /// Explicit tunnel name. A name matching a definition in the agent's
    /// config file expands to that definition.
    pub name: Option<String>,
    /// Protocol (`http`, `tcp`, `tls`). Defaults to `http`.
    pub proto: Option<String>,
    /// Forwarding target: a port, `host:port`, or a URL (`file:///`
    /// serves the agent's built-in fileserver). Defaults to port 80.
    pub addr: Option<String>,
    /// Legacy bind flag. Mutually exclusive with `schemes`.
    pub bind_tls: Option<BindTls>,
    /// Schemes to listen on. Mutually exclusive with `bind_tls`.
    pub schemes: Option<Vec<String>>,
    /// Subdomain to request for the public URL.
    pub subdomain: Option<String>,
    /// Additional options passed through to the control-plane verbatim.
    pub extra: Map<String, Value>,
}

impl TunnelSpec {
    /// Forward a local port over HTTP.
    pub fn http_port(port: u16) -> Self {
        Self {
            addr: Some(port.to_string()),
            ..Self::default()
        }
    }

    /// Use the named tunnel definition from the agent's config file.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }
}

/// Wire shape of a tunnel resource returned by the control-plane.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct TunnelResource {
    pub name: String,
    #[serde(default)]
    pub uri: String,
    pub public_url: String,
    pub proto: String,
    #[serde(default)]
    pub config: TunnelForwarding,
    #[serde(default)]
    pub metrics: Value,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct TunnelForwarding {
    #[serde(default)]
    pub addr: String,
}

/// A tunnel opened through (or adopted from) an agent's control-plane.
#[derive(Debug, Clone)]
pub struct TunnelHandle {
    /// Publicly reachable URL.
    pub public_url: String,
    /// Name on the control-plane, unique per agent.
    pub name: String,
    pub proto: String,
    /// Local forwarding target.
    pub forwards_to: String,
    /// Detail resource path, e.g. `/api/tunnels/my-tunnel`.
    pub uri: String,
    /// Base URL of the owning process's control-plane. A back-reference
    /// by URI, deliberately not a pointer into the process registry.
    pub api_url: String,
    /// Last fetched metrics snapshot.
    pub metrics: Value,
}

impl TunnelHandle {
    pub(crate) fn from_resource(resource: TunnelResource, api_url: &str) -> Self {
        let uri = if resource.uri.is_empty() {
            format!("/api/tunnels/{}", resource.name.replace(' ', "%20"))
        } else {
            resource.uri
        };
        Self {
            public_url: resource.public_url,
            name: resource.name,
            proto: resource.proto,
            forwards_to: resource.config.addr,
            uri,
            api_url: api_url.to_string(),
            metrics: resource.metrics,
        }
    }

    /// Absolute URL of this tunnel's detail resource.
    pub fn detail_url(&self) -> String {
        format!("{}{}", self.api_url, self.uri)
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    fn resource(name: &str, uri: &str) -> TunnelResource {
        TunnelResource {
            name: name.into(),
            uri: uri.into(),
            public_url: "https://abc123.burrow.example".into(),
            proto: "https".into(),
            config: TunnelForwarding {
                addr: "http://localhost:80".into(),
            },
            metrics: Value::Null,
        }
    }

    #[test]
    fn detail_url_joins_api_url_and_uri() {
        let handle =
            TunnelHandle::from_resource(resource("web", "/api/tunnels/web"), "http://127.0.0.1:4040");
        assert_eq!(handle.detail_url(), "http://127.0.0.1:4040/api/tunnels/web");
    }

    #[test]
    fn missing_uri_is_synthesized_with_escaping() {
        let handle = TunnelHandle::from_resource(resource("tunnel (1)", ""), "http://127.0.0.1:4040");
        assert_eq!(handle.uri, "/api/tunnels/tunnel%20(1)");
    }

    #[test]
    fn bind_tls_expansions() {
        assert_eq!(BindTls::HttpOnly.schemes(), vec!["http"]);
        assert_eq!(BindTls::HttpsOnly.schemes(), vec!["https"]);
        assert_eq!(BindTls::Both.schemes(), vec!["http", "https"]);
    }
}
