//! Parsed log event types.

use std::collections::HashMap;

/// Severity reported in a logfmt `lvl=` field.
///
/// The agent abbreviates some level names on the wire (`eror`, `crit`,
/// `dbug`); both spellings map to the same variant.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
    Critical,
    /// Level string this library does not recognize.
    Unknown(String),
}

impl LogLevel {
    /// Whether a line at this level signals a fatal condition during startup.
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Error | Self::Critical)
    }
}

impl From<&str> for LogLevel {
    fn from(raw: &str) -> Self {
        match raw {
            "dbug" | "debug" => Self::Debug,
            "info" => Self::Info,
            "warn" | "warning" => Self::Warn,
            "eror" | "error" => Self::Error,
            "crit" | "critical" => Self::Critical,
            other => Self::Unknown(other.to_string()),
        }
    }
}

/// A single parsed line from the agent's structured log stream.
#[derive(Debug, Clone, Default)]
pub struct LogEvent {
    /// `t=` field, verbatim.
    pub timestamp: Option<String>,
    /// `lvl=` field.
    pub level: LogLevel,
    /// `msg=` field (unquoted). Lines that are not logfmt at all land
    /// here verbatim so nothing from the stream is lost.
    pub message: String,
    /// Remaining key/value pairs (`addr`, `obj`, `err`, ...).
    pub fields: HashMap<String, String>,
    /// The raw line as read from the subprocess.
    pub line: String,
}

/// Lifecycle meaning extracted from a single log event, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleSignal {
    /// The control-plane listener is up; payload is its bind address.
    Ready { addr: String },
    /// The agent reported a fatal condition.
    Fatal { text: String },
}

/// Log message the agent emits when its control-plane listener is up.
const READY_MESSAGE: &str = "starting web service";

impl LogEvent {
    /// Classify this event as a lifecycle signal.
    ///
    /// A `starting web service` line carrying an `addr` field is the
    /// readiness signal. An error/critical-level line is fatal; its text is
    /// the `err` field when present, otherwise the message.
    pub fn signal(&self) -> Option<LifecycleSignal> {
        if self.message == READY_MESSAGE {
            if let Some(addr) = self.fields.get("addr") {
                return Some(LifecycleSignal::Ready { addr: addr.clone() });
            }
        }
        if self.level.is_fatal() {
            let text = self
                .fields
                .get("err")
                .cloned()
                .unwrap_or_else(|| self.message.clone());
            return Some(LifecycleSignal::Fatal { text });
        }
        None
    }
}
