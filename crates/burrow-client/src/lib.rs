//! Burrow Client Library
//!
//! Supervises the locally-run `burrow` tunneling agent and exposes its
//! tunnels through a typed API:
//! - Installer gate provisioning the agent binary and config file
//! - Process supervisor with a per-process log-tailing watchdog
//! - Tunnel session manager over the agent's control-plane REST API
//! - One-shot version/auth-token/update helpers
//!
//! ```no_run
//! use burrow_client::{AgentConfig, BurrowClient, tunnels::TunnelSpec};
//!
//! # async fn demo() -> burrow_client::Result<()> {
//! let client = BurrowClient::new()?;
//! let config = AgentConfig::default();
//! let tunnel = client.connect(&config, TunnelSpec::http_port(5000)).await?;
//! println!("forwarding {} -> {}", tunnel.public_url, tunnel.forwards_to);
//! client.kill(&config).await?;
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod installer;
pub mod ops;
pub mod supervisor;
pub mod tunnels;

use std::sync::Arc;

pub use burrow_core::{AgentConfig, Error, ProcessKey, Result, agent_file, config, logfmt};

use api::ApiClient;
use installer::{HttpFetcher, Installer, default_download_url};
use supervisor::{AgentProcess, ProcessRegistry, Supervisor};
use tunnels::{TunnelHandle, TunnelManager, TunnelRegistry, TunnelSpec};

/// High-level client wiring the supervisor and tunnel manager together
/// over explicitly injected registries.
pub struct BurrowClient {
    supervisor: Supervisor,
    tunnels: TunnelManager,
}

impl BurrowClient {
    /// Client with fresh registries and the default HTTPS installer.
    pub fn new() -> Result<Self> {
        let fetcher = HttpFetcher::new(default_download_url())?;
        Self::with_parts(
            ProcessRegistry::default(),
            TunnelRegistry::default(),
            Installer::new(Arc::new(fetcher)),
        )
    }

    /// Client over caller-owned registries and installer.
    ///
    /// Registries shared between several clients behave as one: at most
    /// one live process per config identity across all of them.
    pub fn with_parts(
        processes: ProcessRegistry,
        tunnel_registry: TunnelRegistry,
        installer: Installer,
    ) -> Result<Self> {
        let api = ApiClient::new(api::DEFAULT_REQUEST_TIMEOUT)?;
        Ok(Self {
            supervisor: Supervisor::new(processes, installer),
            tunnels: TunnelManager::new(tunnel_registry, api),
        })
    }

    pub const fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    pub const fn tunnels(&self) -> &TunnelManager {
        &self.tunnels
    }

    /// Ensure the agent for `config` is running and open a tunnel on it.
    pub async fn connect(&self, config: &AgentConfig, spec: TunnelSpec) -> Result<TunnelHandle> {
        let process = self.supervisor.get_or_create(config).await?;
        self.tunnels.open(&process, config, spec).await
    }

    /// Close a tunnel by public URL or name. Unknown targets are a no-op.
    pub async fn disconnect(&self, url_or_name: &str) -> Result<()> {
        self.tunnels.close(url_or_name).await
    }

    /// Authoritative tunnel list for `config`'s agent.
    pub async fn list(&self, config: &AgentConfig) -> Result<Vec<TunnelHandle>> {
        let process = self.supervisor.get_or_create(config).await?;
        self.tunnels.list(&process, config).await
    }

    /// The running process for `config`, starting one if needed.
    pub async fn process(&self, config: &AgentConfig) -> Result<Arc<AgentProcess>> {
        self.supervisor.get_or_create(config).await
    }

    /// Terminate `config`'s agent and drop every tunnel it owned.
    ///
    /// Idempotent: an unknown or already-dead config is a no-op.
    pub async fn kill(&self, config: &AgentConfig) -> Result<()> {
        let api_url = match self.supervisor.get(config).await {
            Some(process) => process.api_url(),
            None => None,
        };
        self.supervisor.kill(config).await?;
        if let Some(api_url) = api_url {
            let dropped = self.tunnels.remove_owned(&api_url).await;
            if dropped > 0 {
                tracing::debug!(dropped, "dropped tunnels owned by killed process");
            }
        }
        Ok(())
    }
}
