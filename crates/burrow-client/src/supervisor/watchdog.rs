//! Per-process log-tailing watchdog.
//!
//! One task per agent process, alive for the process's entire lifetime:
//! it parses every stdout line, keeps the rolling log buffer, forwards
//! events to the optional sink, publishes the startup outcome, and flips
//! the lifecycle state when the stream ends.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex as StdMutex, PoisonError, RwLock as StdRwLock};

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{ChildStderr, ChildStdout};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use burrow_core::ProcessKey;
use burrow_core::logfmt::{self, LifecycleSignal, LogEvent};

use super::process::{ProcessState, StartupStatus};

pub(crate) struct Watchdog {
    pub key: ProcessKey,
    pub stdout: ChildStdout,
    pub stderr: Option<ChildStderr>,
    pub state: Arc<StdRwLock<ProcessState>>,
    pub logs: Arc<StdMutex<VecDeque<LogEvent>>>,
    pub startup_tx: watch::Sender<StartupStatus>,
    pub log_sink: Option<mpsc::Sender<LogEvent>>,
    pub max_log_lines: usize,
}

pub(crate) fn spawn(mut watchdog: Watchdog) -> JoinHandle<()> {
    // Drain stderr separately so agent diagnostics surface in our logs.
    if let Some(stderr) = watchdog.stderr.take() {
        let key = watchdog.key.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(key = %key, "agent stderr: {line}");
            }
        });
    }

    tokio::spawn(watchdog.run())
}

impl Watchdog {
    async fn run(self) {
        let Self {
            key,
            stdout,
            stderr: _,
            state,
            logs,
            startup_tx,
            log_sink,
            max_log_lines,
        } = self;

        let mut lines = BufReader::new(stdout).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let event = logfmt::parse_line(&line);

            {
                let mut buffer = logs.lock().unwrap_or_else(PoisonError::into_inner);
                if max_log_lines > 0 {
                    while buffer.len() >= max_log_lines {
                        buffer.pop_front();
                    }
                }
                buffer.push_back(event.clone());
            }

            if let Some(sink) = &log_sink {
                // A slow or closed consumer must not stall readiness detection.
                if sink.try_send(event.clone()).is_err() {
                    debug!(key = %key, "log-event sink full or closed, dropping event");
                }
            }

            match event.signal() {
                Some(LifecycleSignal::Ready { addr }) => {
                    if current(&state) == ProcessState::Starting {
                        set(&state, ProcessState::Ready);
                        let api_url = format!("http://{addr}");
                        info!(key = %key, api_url, "agent control-plane is up");
                        let _ = startup_tx.send(StartupStatus::Ready { api_url });
                    }
                }
                Some(LifecycleSignal::Fatal { text }) => {
                    if current(&state) == ProcessState::Starting {
                        set(&state, ProcessState::Error);
                        warn!(key = %key, error = %text, "agent reported a fatal startup condition");
                        let _ = startup_tx.send(StartupStatus::Failed { message: text });
                    } else {
                        warn!(key = %key, error = %text, "agent reported an error");
                    }
                }
                None => {}
            }
        }

        // Stream closed: the process is gone.
        match current(&state) {
            ProcessState::Starting => {
                set(&state, ProcessState::Error);
                let _ = startup_tx.send(StartupStatus::Failed {
                    message: "the agent process exited before signalling readiness".into(),
                });
            }
            ProcessState::Ready | ProcessState::Dying => {
                set(&state, ProcessState::Terminated);
            }
            ProcessState::Terminated | ProcessState::Error => {}
        }
        info!(key = %key, "watchdog finished");
    }
}

fn current(state: &StdRwLock<ProcessState>) -> ProcessState {
    *state.read().unwrap_or_else(PoisonError::into_inner)
}

fn set(state: &StdRwLock<ProcessState>, next: ProcessState) {
    *state.write().unwrap_or_else(PoisonError::into_inner) = next;
}
