//! Tunnel session manager.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use reqwest::Method;
use serde_json::{Map, Value, json};
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use burrow_core::agent_file::{self, TunnelDefinition};
use burrow_core::{AgentConfig, Error, Result};

use super::handle::{BindTls, TunnelHandle, TunnelResource, TunnelSpec};
use crate::api::ApiClient;
use crate::supervisor::AgentProcess;

/// Tunnel registry: name → handle, shared across every caller in the
/// process. Injected, not a hidden global.
pub type TunnelRegistry = Arc<RwLock<HashMap<String, TunnelHandle>>>;

/// Name of the config-file definition used when a caller provides
/// neither a name nor any spec fields.
pub const DEFAULT_DEFINITION: &str = "burrow-default";

type SchemeSuffix = Arc<dyn Fn(&str, &str) -> String + Send + Sync>;

/// Opens, closes, lists, and reconciles tunnels over a process's
/// control-plane.
pub struct TunnelManager {
    registry: TunnelRegistry,
    api: ApiClient,
    scheme_suffix: SchemeSuffix,
}

impl TunnelManager {
    pub fn new(registry: TunnelRegistry, api: ApiClient) -> Self {
        Self {
            registry,
            api,
            scheme_suffix: Arc::new(|name, scheme| format!("{name} ({scheme})")),
        }
    }

    /// Override how names are disambiguated across schemes.
    ///
    /// The remote's own naming rules stay authoritative for anything it
    /// reports back; this only shapes what we ask for.
    pub fn with_scheme_suffix(
        mut self,
        compose: impl Fn(&str, &str) -> String + Send + Sync + 'static,
    ) -> Self {
        self.scheme_suffix = Arc::new(compose);
        self
    }

    /// Open a tunnel on `process` and register the resulting handle(s).
    ///
    /// A spec expanding to multiple schemes issues one call per scheme;
    /// the first binding is returned as the canonical handle and every
    /// binding is registered. The registry is updated before returning,
    /// so the new tunnel is visible to an immediate [`Self::list`].
    pub async fn open(
        &self,
        process: &AgentProcess,
        config: &AgentConfig,
        spec: TunnelSpec,
    ) -> Result<TunnelHandle> {
        validate_spec(&spec)?;
        let api_url = control_plane_url(process)?;
        let plan = resolve_spec(&spec, config)?;

        let endpoint = format!("{api_url}/api/tunnels");
        let mut opened = Vec::new();
        for body in plan.requests(self.scheme_suffix.as_ref()) {
            let payload = self
                .api
                .request(
                    &endpoint,
                    Method::POST,
                    &[],
                    Some(&body),
                    Some(config.request_timeout),
                )
                .await?
                .ok_or_else(|| Error::Transport {
                    url: endpoint.clone(),
                    reason: "empty response to tunnel-open request".into(),
                })?;
            let resource: TunnelResource = serde_json::from_value(payload)?;
            let handle = TunnelHandle::from_resource(resource, &api_url);
            info!(name = %handle.name, public_url = %handle.public_url, "tunnel opened");
            self.registry
                .write()
                .await
                .insert(handle.name.clone(), handle.clone());
            opened.push(handle);
        }

        opened.into_iter().next().ok_or_else(|| Error::Transport {
            url: endpoint,
            reason: "tunnel-open request produced no bindings".into(),
        })
    }

    /// Close a tunnel by public URL or name.
    ///
    /// Unknown targets and control-plane 404s count as already closed;
    /// any other HTTP error propagates and the handle stays registered.
    pub async fn close(&self, url_or_name: &str) -> Result<()> {
        let found = {
            let registry = self.registry.read().await;
            registry
                .values()
                .find(|handle| handle.public_url == url_or_name)
                .or_else(|| registry.get(url_or_name))
                .cloned()
        };
        let Some(handle) = found else {
            debug!(target = url_or_name, "close requested for unknown tunnel");
            return Ok(());
        };

        match self
            .api
            .request(&handle.detail_url(), Method::DELETE, &[], None, None)
            .await
        {
            Ok(_) => {}
            Err(e) if e.is_not_found() => {
                debug!(name = %handle.name, "tunnel already gone on the control-plane");
            }
            Err(e) => return Err(e),
        }

        self.registry.write().await.remove(&handle.name);
        info!(name = %handle.name, "tunnel closed");
        Ok(())
    }

    /// Fetch the authoritative tunnel list from `process` and reconcile
    /// the registry against it.
    ///
    /// Server-side tunnels missing locally are adopted; local entries for
    /// this process that the server no longer reports are dropped. The
    /// returned list reflects the control-plane, not the local cache.
    pub async fn list(
        &self,
        process: &AgentProcess,
        config: &AgentConfig,
    ) -> Result<Vec<TunnelHandle>> {
        let api_url = control_plane_url(process)?;
        let payload = self
            .api
            .request(
                &format!("{api_url}/api/tunnels"),
                Method::GET,
                &[],
                None,
                Some(config.request_timeout),
            )
            .await?
            .unwrap_or_else(|| json!({}));

        let resources: Vec<TunnelResource> = payload
            .get("tunnels")
            .map(|tunnels| serde_json::from_value(tunnels.clone()))
            .transpose()?
            .unwrap_or_default();

        let handles: Vec<TunnelHandle> = resources
            .into_iter()
            .map(|resource| TunnelHandle::from_resource(resource, &api_url))
            .collect();

        {
            let mut registry = self.registry.write().await;
            let live: HashSet<&str> = handles.iter().map(|handle| handle.name.as_str()).collect();
            registry
                .retain(|name, handle| handle.api_url != api_url || live.contains(name.as_str()));
            for handle in &handles {
                registry.insert(handle.name.clone(), handle.clone());
            }
        }

        Ok(handles)
    }

    /// Re-fetch the tunnel's detail resource and update only its metrics
    /// snapshot; identity fields are left untouched.
    pub async fn refresh_metrics(&self, handle: &mut TunnelHandle) -> Result<()> {
        let payload = self
            .api
            .request(&handle.detail_url(), Method::GET, &[], None, None)
            .await?;
        let Some(payload) = payload else {
            return Ok(());
        };
        let resource: TunnelResource = serde_json::from_value(payload)?;
        handle.metrics = resource.metrics.clone();
        if let Some(entry) = self.registry.write().await.get_mut(&handle.name) {
            entry.metrics = resource.metrics;
        }
        Ok(())
    }

    /// Registered handle by exact name.
    pub async fn get(&self, name: &str) -> Option<TunnelHandle> {
        self.registry.read().await.get(name).cloned()
    }

    /// Drop every registered handle owned by the given control-plane.
    /// Returns how many were dropped.
    pub async fn remove_owned(&self, api_url: &str) -> usize {
        let mut registry = self.registry.write().await;
        let before = registry.len();
        registry.retain(|_, handle| handle.api_url != api_url);
        before - registry.len()
    }

    /// Number of registered tunnel handles.
    pub async fn registered_count(&self) -> usize {
        self.registry.read().await.len()
    }
}

fn control_plane_url(process: &AgentProcess) -> Result<String> {
    process.api_url().ok_or_else(|| Error::ProcessStart {
        message: "the agent process has no reachable control-plane".into(),
        logs: Vec::new(),
    })
}

/// Reject locally-invalid specs before any network traffic.
fn validate_spec(spec: &TunnelSpec) -> Result<()> {
    if spec.bind_tls.is_some() && spec.schemes.is_some() {
        return Err(Error::ConfigValidation(
            "bind_tls and schemes cannot both be passed on a tunnel spec".into(),
        ));
    }
    Ok(())
}

/// Fully-resolved open request, after definition lookup and defaulting.
struct OpenPlan {
    name: String,
    proto: String,
    addr: String,
    schemes: Vec<String>,
    options: Map<String, Value>,
}

impl OpenPlan {
    /// One request body per underlying binding.
    fn requests(&self, suffix: &(dyn Fn(&str, &str) -> String + Send + Sync)) -> Vec<Value> {
        if self.schemes.is_empty() {
            return vec![self.body(&self.name, None)];
        }
        self.schemes
            .iter()
            .enumerate()
            .map(|(index, scheme)| {
                let name = if index == 0 {
                    self.name.clone()
                } else {
                    suffix(&self.name, scheme)
                };
                self.body(&name, Some(scheme))
            })
            .collect()
    }

    fn body(&self, name: &str, scheme: Option<&str>) -> Value {
        let mut map = self.options.clone();
        map.insert("name".into(), Value::String(name.into()));
        map.insert("proto".into(), Value::String(self.proto.clone()));
        map.insert("addr".into(), Value::String(self.addr.clone()));
        if let Some(scheme) = scheme {
            map.insert("schemes".into(), json!([scheme]));
        }
        Value::Object(map)
    }
}

/// Resolve a spec against the agent's config file.
///
/// Precedence per field: explicit spec value, then the named definition
/// (or the `burrow-default` definition when no name was given), then the
/// built-in default.
fn resolve_spec(spec: &TunnelSpec, config: &AgentConfig) -> Result<OpenPlan> {
    let file = agent_file::load(&config.config_path)?;
    let definition: Option<(&str, &TunnelDefinition)> = match &spec.name {
        Some(name) => file.tunnel_definition(name).map(|def| (name.as_str(), def)),
        None => file
            .tunnel_definition(DEFAULT_DEFINITION)
            .map(|def| (DEFAULT_DEFINITION, def)),
    };
    let def = definition.map(|(_, d)| d);

    let proto = spec
        .proto
        .clone()
        .or_else(|| def.and_then(|d| d.proto.clone()))
        .unwrap_or_else(|| "http".into());
    let addr = spec
        .addr
        .clone()
        .or_else(|| def.and_then(|d| d.addr.clone()))
        .unwrap_or_else(|| "80".into());

    // Schemes only mean something for HTTP tunnels; a tcp/tls tunnel is a
    // single binding.
    let schemes = if proto == "http" {
        spec.bind_tls
            .map(BindTls::schemes)
            .or_else(|| spec.schemes.clone())
            .or_else(|| def.and_then(|d| d.schemes.clone()))
            .unwrap_or_else(|| vec!["https".into()])
    } else {
        Vec::new()
    };

    let mut options = Map::new();
    if let Some(def) = def {
        for (key, value) in &def.extra {
            options.insert(key.clone(), serde_json::to_value(value)?);
        }
        if let Some(subdomain) = &def.subdomain {
            options.insert("subdomain".into(), Value::String(subdomain.clone()));
        }
    }
    for (key, value) in &spec.extra {
        options.insert(key.clone(), value.clone());
    }
    if let Some(subdomain) = &spec.subdomain {
        options.insert("subdomain".into(), Value::String(subdomain.clone()));
    }

    let name = spec
        .name
        .clone()
        .or_else(|| definition.map(|(name, _)| name.to_string()))
        .unwrap_or_else(|| default_name(&proto, &addr));

    Ok(OpenPlan {
        name,
        proto,
        addr,
        schemes,
        options,
    })
}

/// Synthesize a default tunnel name from protocol, target, and a short
/// random suffix, e.g. `http-5000-1f3a9c2d`.
fn default_name(proto: &str, addr: &str) -> String {
    let target = addr.split_once("://").map_or_else(
        || addr.replace([':', '/'], "-"),
        |(scheme, _)| scheme.to_string(),
    );
    let id = Uuid::new_v4().simple().to_string();
    format!("{proto}-{target}-{}", &id[..8])
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    fn scratch_config(yaml: &str) -> (tempfile::TempDir, AgentConfig) {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("burrow.yml");
        std::fs::write(&config_path, yaml).unwrap();
        let config = AgentConfig {
            config_path,
            ..AgentConfig::default()
        };
        (dir, config)
    }

    #[test]
    fn bind_tls_and_schemes_cannot_both_be_passed() {
        let spec = TunnelSpec {
            bind_tls: Some(BindTls::Both),
            schemes: Some(vec!["http".into()]),
            ..TunnelSpec::default()
        };
        let err = validate_spec(&spec).unwrap_err();
        assert!(matches!(err, Error::ConfigValidation(_)));
        assert!(err.to_string().contains("cannot both be passed"));
    }

    #[test]
    fn default_name_composes_proto_port_and_suffix() {
        let name = default_name("http", "5000");
        assert!(name.starts_with("http-5000-"));
        assert_eq!(name.len(), "http-5000-".len() + 8);
    }

    #[test]
    fn default_name_sanitizes_url_addrs() {
        assert!(default_name("http", "file:///").starts_with("http-file-"));
        assert!(default_name("tcp", "localhost:22").starts_with("tcp-localhost-22-"));
    }

    #[test]
    fn names_are_unique_across_calls() {
        assert_ne!(default_name("http", "80"), default_name("http", "80"));
    }

    #[test]
    fn plain_spec_defaults_to_https_port_80() {
        let (_dir, config) = scratch_config("{}");
        let plan = resolve_spec(&TunnelSpec::default(), &config).unwrap();
        assert_eq!(plan.proto, "http");
        assert_eq!(plan.addr, "80");
        assert_eq!(plan.schemes, vec!["https"]);
        assert_eq!(plan.requests(&|n: &str, s: &str| format!("{n} ({s})")).len(), 1);
    }

    #[test]
    fn dual_scheme_plan_issues_one_request_per_scheme() {
        let (_dir, config) = scratch_config("{}");
        let spec = TunnelSpec {
            name: Some("web".into()),
            schemes: Some(vec!["http".into(), "https".into()]),
            ..TunnelSpec::default()
        };
        let plan = resolve_spec(&spec, &config).unwrap();
        let bodies = plan.requests(&|n: &str, s: &str| format!("{n} ({s})"));
        assert_eq!(bodies.len(), 2);
        assert_eq!(bodies[0]["name"], "web");
        assert_eq!(bodies[0]["schemes"], json!(["http"]));
        assert_eq!(bodies[1]["name"], "web (https)");
        assert_eq!(bodies[1]["schemes"], json!(["https"]));
    }

    #[test]
    fn tcp_spec_ignores_schemes() {
        let (_dir, config) = scratch_config("{}");
        let spec = TunnelSpec {
            proto: Some("tcp".into()),
            addr: Some("22".into()),
            ..TunnelSpec::default()
        };
        let plan = resolve_spec(&spec, &config).unwrap();
        assert!(plan.schemes.is_empty());
        let bodies = plan.requests(&|n: &str, s: &str| format!("{n} ({s})"));
        assert_eq!(bodies.len(), 1);
        assert!(bodies[0].get("schemes").is_none());
    }

    #[test]
    fn named_definition_supplies_fields() {
        let (_dir, config) = scratch_config(
            r"
tunnels:
  web-app:
    proto: http
    addr: '8000'
    schemes: [http, https]
    subdomain: my-app
",
        );
        let plan = resolve_spec(&TunnelSpec::named("web-app"), &config).unwrap();
        assert_eq!(plan.name, "web-app");
        assert_eq!(plan.addr, "8000");
        assert_eq!(plan.schemes, vec!["http", "https"]);
        assert_eq!(plan.options["subdomain"], "my-app");
    }

    #[test]
    fn default_definition_used_when_no_name_given() {
        let (_dir, config) = scratch_config(
            r"
tunnels:
  burrow-default:
    proto: http
    addr: '8080'
    subdomain: staging
",
        );
        let plan = resolve_spec(&TunnelSpec::default(), &config).unwrap();
        assert_eq!(plan.name, DEFAULT_DEFINITION);
        assert_eq!(plan.addr, "8080");
        assert_eq!(plan.options["subdomain"], "staging");
    }

    #[test]
    fn spec_fields_override_definition_fields() {
        let (_dir, config) = scratch_config(
            r"
tunnels:
  burrow-default:
    proto: http
    addr: '8080'
    subdomain: staging
",
        );
        let spec = TunnelSpec {
            addr: Some("5000".into()),
            subdomain: Some("override".into()),
            ..TunnelSpec::default()
        };
        let plan = resolve_spec(&spec, &config).unwrap();
        assert_eq!(plan.addr, "5000");
        assert_eq!(plan.options["subdomain"], "override");
    }

    #[test]
    fn unnamed_spec_without_default_definition_synthesizes_name() {
        let (_dir, config) = scratch_config("{}");
        let spec = TunnelSpec::http_port(5000);
        let plan = resolve_spec(&spec, &config).unwrap();
        assert!(plan.name.starts_with("http-5000-"));
    }
}
