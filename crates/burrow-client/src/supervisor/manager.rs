//! Agent process supervisor.

use std::collections::{HashMap, VecDeque};
use std::process::Stdio;
use std::sync::{Arc, Mutex as StdMutex, PoisonError, RwLock as StdRwLock};
use std::time::Duration;

use tokio::process::Command;
use tokio::sync::{Mutex, RwLock, watch};
use tracing::{debug, info};

use burrow_core::{AgentConfig, Error, ProcessKey, Result, agent_file};

use super::process::{AgentProcess, ProcessState, StartupStatus};
use super::watchdog;
use crate::installer::Installer;

/// Process registry: at most one live entry per config identity.
///
/// Constructed by the embedding application and injected, so "process-wide"
/// visibility is explicit rather than a hidden global.
pub type ProcessRegistry = Arc<RwLock<HashMap<ProcessKey, Arc<AgentProcess>>>>;

/// Supervises agent subprocesses keyed by configuration identity.
pub struct Supervisor {
    registry: ProcessRegistry,
    installer: Installer,
    /// Per-identity locks serializing check-then-spawn. Distinct configs
    /// never contend with each other here.
    spawn_locks: StdMutex<HashMap<ProcessKey, Arc<Mutex<()>>>>,
    terminate_timeout: Duration,
}

impl Supervisor {
    pub fn new(registry: ProcessRegistry, installer: Installer) -> Self {
        Self {
            registry,
            installer,
            spawn_locks: StdMutex::new(HashMap::new()),
            terminate_timeout: Duration::from_secs(5),
        }
    }

    /// Override how long a signalled child gets before SIGKILL.
    pub const fn with_terminate_timeout(mut self, timeout: Duration) -> Self {
        self.terminate_timeout = timeout;
        self
    }

    /// Look up the live process for this config without starting one.
    pub async fn get(&self, config: &AgentConfig) -> Option<Arc<AgentProcess>> {
        let registry = self.registry.read().await;
        registry
            .get(&config.key())
            .filter(|process| process.is_alive())
            .cloned()
    }

    /// Number of live processes in the registry.
    pub async fn active_count(&self) -> usize {
        self.registry
            .read()
            .await
            .values()
            .filter(|process| process.is_alive())
            .count()
    }

    /// Get the running process for this config, starting one if needed.
    ///
    /// Blocks until the process is ready, failed, or timed out. An entry
    /// that is already alive is reused as-is. Concurrent calls for the
    /// same identity spawn exactly one process; calls for distinct
    /// identities proceed independently.
    pub async fn get_or_create(&self, config: &AgentConfig) -> Result<Arc<AgentProcess>> {
        let key = config.key();
        let lock = self.spawn_lock(&key);

        let process = {
            let _guard = lock.lock().await;

            let existing = { self.registry.read().await.get(&key).cloned() };
            match existing {
                Some(process) if process.is_alive() => process,
                stale => {
                    if stale.is_some() {
                        self.registry.write().await.remove(&key);
                    }
                    self.installer
                        .ensure_installed(&config.binary_path, &config.config_path)
                        .await?;

                    // Disallowed options fail here, before anything is spawned.
                    let file = agent_file::load(&config.config_path)?;
                    agent_file::validate(&file)?;

                    let process = spawn_agent(config)?;
                    self.registry
                        .write()
                        .await
                        .insert(key.clone(), Arc::clone(&process));
                    process
                }
            }
        };

        match process.wait_ready(config.startup_timeout).await {
            Ok(api_url) => {
                debug!(key = %key, api_url, "agent process ready");
                Ok(process)
            }
            Err(e) => {
                // Never leave a half-started process behind. Only remove
                // our own entry; another caller may have replaced it.
                {
                    let mut registry = self.registry.write().await;
                    if registry
                        .get(&key)
                        .is_some_and(|entry| Arc::ptr_eq(entry, &process))
                    {
                        registry.remove(&key);
                    }
                }
                process.shutdown(self.terminate_timeout).await;
                Err(e)
            }
        }
    }

    /// Terminate the process for this config and remove it from the
    /// registry.
    ///
    /// Unknown or already-dead configs are a no-op. On return the child
    /// has been reaped and the watchdog joined.
    pub async fn kill(&self, config: &AgentConfig) -> Result<()> {
        let key = config.key();
        let removed = { self.registry.write().await.remove(&key) };
        let Some(process) = removed else {
            debug!(key = %key, "kill requested for unknown process");
            return Ok(());
        };

        process.shutdown(self.terminate_timeout).await;
        info!(key = %key, "agent process killed");
        Ok(())
    }

    fn spawn_lock(&self, key: &ProcessKey) -> Arc<Mutex<()>> {
        let mut locks = self
            .spawn_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(key.clone()).or_default())
    }
}

/// Spawn the agent binary and attach a watchdog to its log stream.
fn spawn_agent(config: &AgentConfig) -> Result<Arc<AgentProcess>> {
    let mut cmd = Command::new(&config.binary_path);
    cmd.arg("start")
        .arg("--none")
        .arg("--log=stdout")
        .arg("--config")
        .arg(&config.config_path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    if let Some(region) = &config.region {
        cmd.arg("--region").arg(region);
    }
    if let Some(token) = &config.auth_token {
        cmd.arg("--authtoken").arg(token);
    }

    info!(
        binary = %config.binary_path.display(),
        config = %config.config_path.display(),
        region = ?config.region,
        "Spawning agent process"
    );
    let mut child = cmd.spawn().map_err(|e| Error::ProcessStart {
        message: format!("failed to spawn {}: {e}", config.binary_path.display()),
        logs: Vec::new(),
    })?;

    let stdout = child.stdout.take().ok_or_else(|| Error::ProcessStart {
        message: "failed to capture agent stdout".into(),
        logs: Vec::new(),
    })?;
    let stderr = child.stderr.take();

    let key = config.key();
    let state = Arc::new(StdRwLock::new(ProcessState::Starting));
    let logs = Arc::new(StdMutex::new(VecDeque::with_capacity(config.max_log_lines)));
    let (startup_tx, startup_rx) = watch::channel(StartupStatus::Pending);

    let handle = watchdog::spawn(watchdog::Watchdog {
        key: key.clone(),
        stdout,
        stderr,
        state: Arc::clone(&state),
        logs: Arc::clone(&logs),
        startup_tx,
        log_sink: config.log_events.clone(),
        max_log_lines: config.max_log_lines,
    });

    Ok(Arc::new(AgentProcess::new(
        key, child, state, startup_rx, logs, handle,
    )))
}
