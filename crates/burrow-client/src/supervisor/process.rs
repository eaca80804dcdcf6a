//! Runtime handle for a supervised agent process.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex as StdMutex, PoisonError, RwLock as StdRwLock};
use std::time::Duration;

use tokio::process::Child;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use burrow_core::logfmt::LogEvent;
use burrow_core::{Error, ProcessKey, Result};

/// Lifecycle states of a supervised agent process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    /// Spawned, waiting for the readiness signal.
    Starting,
    /// Control-plane reachable.
    Ready,
    /// Teardown requested, child signalled.
    Dying,
    /// Child exited and was reaped.
    Terminated,
    /// Launch failed; terminal.
    Error,
}

/// Startup outcome published by the watchdog over the startup channel.
#[derive(Debug, Clone)]
pub(crate) enum StartupStatus {
    Pending,
    Ready { api_url: String },
    Failed { message: String },
}

/// Handle to a running (or recently stopped) agent process.
///
/// Owned by the supervisor's registry; everything callers need is
/// readable through shared references.
pub struct AgentProcess {
    key: ProcessKey,
    pid: Option<u32>,
    child: Mutex<Child>,
    state: Arc<StdRwLock<ProcessState>>,
    startup: watch::Receiver<StartupStatus>,
    logs: Arc<StdMutex<VecDeque<LogEvent>>>,
    watchdog: Mutex<Option<JoinHandle<()>>>,
}

impl AgentProcess {
    pub(crate) fn new(
        key: ProcessKey,
        child: Child,
        state: Arc<StdRwLock<ProcessState>>,
        startup: watch::Receiver<StartupStatus>,
        logs: Arc<StdMutex<VecDeque<LogEvent>>>,
        watchdog: JoinHandle<()>,
    ) -> Self {
        let pid = child.id();
        Self {
            key,
            pid,
            child: Mutex::new(child),
            state,
            startup,
            logs,
            watchdog: Mutex::new(Some(watchdog)),
        }
    }

    /// Registry identity of this process.
    pub const fn key(&self) -> &ProcessKey {
        &self.key
    }

    /// OS process id captured at spawn.
    pub const fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ProcessState {
        *self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether this process is usable or still becoming usable.
    pub fn is_alive(&self) -> bool {
        matches!(self.state(), ProcessState::Starting | ProcessState::Ready)
    }

    /// Base URL of this process's control-plane, once ready.
    pub fn api_url(&self) -> Option<String> {
        match &*self.startup.borrow() {
            StartupStatus::Ready { api_url } => Some(api_url.clone()),
            _ => None,
        }
    }

    /// Port the control-plane is bound to, once ready.
    pub fn port(&self) -> Option<u16> {
        let api_url = self.api_url()?;
        api_url.rsplit(':').next()?.parse().ok()
    }

    /// Snapshot of the rolling buffer of recent log events.
    pub fn logs(&self) -> Vec<LogEvent> {
        self.logs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    /// Whether the OS has reported the child as exited (reaped).
    pub async fn has_exited(&self) -> bool {
        self.child
            .lock()
            .await
            .try_wait()
            .map(|status| status.is_some())
            .unwrap_or(false)
    }

    /// Block until the watchdog reports a startup outcome, bounded by
    /// `startup_timeout`. Returns the control-plane URL on success.
    pub(crate) async fn wait_ready(&self, startup_timeout: Duration) -> Result<String> {
        let mut startup = self.startup.clone();
        let outcome = tokio::time::timeout(
            startup_timeout,
            startup.wait_for(|status| !matches!(status, StartupStatus::Pending)),
        )
        .await;

        match outcome {
            Err(_) => Err(Error::ProcessTimeout {
                timeout: startup_timeout,
            }),
            Ok(Err(_)) => {
                Err(self.start_failure("the watchdog stopped before the agent signalled readiness"))
            }
            Ok(Ok(status)) => match &*status {
                StartupStatus::Ready { api_url } => Ok(api_url.clone()),
                StartupStatus::Failed { message } => Err(self.start_failure(message)),
                StartupStatus::Pending => {
                    Err(self.start_failure("the agent never signalled readiness"))
                }
            },
        }
    }

    /// Build a startup error embedding the tail of the captured logs.
    fn start_failure(&self, message: &str) -> Error {
        let logs: Vec<String> = self.logs().into_iter().map(|event| event.line).collect();
        let tail_start = logs.len().saturating_sub(10);
        let tail = &logs[tail_start..];
        let message = if tail.is_empty() {
            message.to_string()
        } else {
            format!("{message}\n\nRecent agent output:\n{}", tail.join("\n"))
        };
        Error::ProcessStart { message, logs }
    }

    /// Terminate the child, reap it, and join the watchdog.
    ///
    /// Safe to call more than once; a second call finds the child already
    /// exited and the watchdog already joined.
    pub(crate) async fn shutdown(&self, terminate_timeout: Duration) {
        self.store_state(ProcessState::Dying);

        {
            let mut child = self.child.lock().await;

            #[cfg(unix)]
            {
                if let Some(pid) = child.id() {
                    // SAFETY: pid is a valid process ID obtained from our own
                    // Child handle. kill(2) with SIGTERM is safe to call on
                    // any owned subprocess.
                    #[allow(unsafe_code)]
                    #[allow(clippy::cast_possible_wrap)]
                    let ret = unsafe { libc::kill(pid as i32, libc::SIGTERM) };
                    if ret != 0 {
                        let err = std::io::Error::last_os_error();
                        warn!(key = %self.key, pid, error = %err, "Failed to send SIGTERM");
                    }
                }
            }
            #[cfg(not(unix))]
            {
                let _ = child.start_kill();
            }

            match tokio::time::timeout(terminate_timeout, child.wait()).await {
                Ok(Ok(status)) => {
                    info!(key = %self.key, ?status, "Agent process exited");
                }
                Ok(Err(e)) => {
                    warn!(key = %self.key, error = %e, "Error waiting for agent process");
                    child.kill().await.ok();
                }
                Err(_) => {
                    warn!(key = %self.key, "Timeout waiting for graceful shutdown, killing");
                    child.kill().await.ok();
                }
            }
        }

        self.store_state(ProcessState::Terminated);

        if let Some(handle) = self.watchdog.lock().await.take() {
            handle.await.ok();
        }
    }

    fn store_state(&self, next: ProcessState) {
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = next;
    }
}

impl std::fmt::Debug for AgentProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentProcess")
            .field("key", &self.key)
            .field("pid", &self.pid)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
