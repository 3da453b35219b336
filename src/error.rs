//! Unified error handling for sitbot.
//!
//! One error enum per layer, with `From` conversions flowing upward from the
//! transport to the session and the administrative requests.

use sitbot_proto::ProtocolError;
use thiserror::Error;

use crate::task::TaskId;

// ============================================================================
// Transport Errors
// ============================================================================

/// Faults of the physical connection. All of them are fatal to the Transport.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connect to {addr} failed: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid address {0:?}")]
    Address(String),

    #[error("proxy handshake failed: {0}")]
    Proxy(String),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("transport closed")]
    Closed,
}

impl TransportError {
    /// Get a static error code string for log labeling.
    #[inline]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Connect { .. } => "connect",
            Self::Address(_) => "address",
            Self::Proxy(_) => "proxy",
            Self::Protocol(_) => "protocol",
            Self::Closed => "closed",
        }
    }
}

// ============================================================================
// Task Errors
// ============================================================================

/// Faults of a single task. They never affect other tasks.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("no such task: {0}")]
    NotFound(TaskId),

    #[error("failed to spawn {command:?}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("command output: {0}")]
    Io(#[from] std::io::Error),

    #[error("empty command line")]
    EmptyCommand,

    #[error("task cancelled")]
    Cancelled,

    #[error("transport closed")]
    Closed,
}

impl TaskError {
    #[inline]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::Spawn { .. } => "spawn",
            Self::Io(_) => "io",
            Self::EmptyCommand => "empty_command",
            Self::Cancelled => "cancelled",
            Self::Closed => "closed",
        }
    }
}

impl From<TransportError> for TaskError {
    fn from(_: TransportError) -> Self {
        TaskError::Closed
    }
}

// ============================================================================
// Pattern Errors
// ============================================================================

/// A rule failed to compile. The previously active rules stay in force.
#[derive(Debug, Error)]
#[error("pattern rule {index} ({pattern:?}): {source}")]
pub struct PatternError {
    pub index: usize,
    pub pattern: String,
    #[source]
    pub source: regex::Error,
}

// ============================================================================
// Session Errors
// ============================================================================

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Pattern(#[from] PatternError),

    #[error(transparent)]
    Task(#[from] TaskError),

    #[error("no welcome from server within {0:?}")]
    LoginTimeout(std::time::Duration),

    #[error("session closed")]
    Closed,
}

impl SessionError {
    #[inline]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Transport(e) => e.error_code(),
            Self::Pattern(_) => "pattern",
            Self::Task(e) => e.error_code(),
            Self::LoginTimeout(_) => "login_timeout",
            Self::Closed => "closed",
        }
    }
}

// ============================================================================
// Bouncer Errors
// ============================================================================

/// Faults of one bounced connection (or of the listener). The primary
/// session is never affected.
#[derive(Debug, Error)]
pub enum BouncerError {
    #[error("bouncer io: {0}")]
    Io(#[from] std::io::Error),

    #[error("session did not finish login within {0:?}")]
    WelcomeTimeout(std::time::Duration),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("client quit")]
    Quit,

    #[error("connection closed")]
    Closed,
}

impl BouncerError {
    #[inline]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Io(_) => "io",
            Self::WelcomeTimeout(_) => "welcome_timeout",
            Self::Transport(e) => e.error_code(),
            Self::Quit => "quit",
            Self::Closed => "closed",
        }
    }
}

// ============================================================================
// Administrative Errors
// ============================================================================

/// Outcome classes of administrative requests.
#[derive(Debug, Error)]
pub enum AdminError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),
}

impl From<TaskError> for AdminError {
    fn from(e: TaskError) -> Self {
        match e {
            TaskError::NotFound(tid) => AdminError::NotFound(format!("task {tid}")),
            other => AdminError::BadRequest(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for AdminError {
    fn from(e: serde_json::Error) -> Self {
        AdminError::BadRequest(e.to_string())
    }
}

impl From<PatternError> for AdminError {
    fn from(e: PatternError) -> Self {
        AdminError::BadRequest(e.to_string())
    }
}

impl From<SessionError> for AdminError {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::Task(task) => task.into(),
            other => AdminError::BadRequest(other.to_string()),
        }
    }
}

impl From<BouncerError> for AdminError {
    fn from(e: BouncerError) -> Self {
        AdminError::BadRequest(e.to_string())
    }
}
