//! Telemetry utilities for task timing and log correlation.

use std::time::Instant;
use tracing::debug;

/// Guard for timing a task body.
///
/// Logs the elapsed time and emitted line count when dropped.
pub struct TaskTimer {
    command: String,
    start: Instant,
}

impl TaskTimer {
    /// Start timing a task.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            start: Instant::now(),
        }
    }
}

impl Drop for TaskTimer {
    fn drop(&mut self) {
        let elapsed_ms = self.start.elapsed().as_millis() as u64;
        debug!(command = %self.command, elapsed_ms, "task done");
    }
}

/// Standardized span constructors.
pub mod spans {
    use std::net::SocketAddr;
    use tracing::{Span, info_span};

    use crate::task::TaskId;

    /// Create a span for a bot session.
    pub fn session(id: &str, nick: &str) -> Span {
        info_span!("session", id = %id, nick = %nick)
    }

    /// Create a span for one scheduled task.
    pub fn task(tid: TaskId, name: &str) -> Span {
        info_span!("task", tid = %tid, name = %name)
    }

    /// Create a span for a bounced client connection.
    pub fn bouncer(session: &str, peer: Option<SocketAddr>) -> Span {
        if let Some(peer) = peer {
            info_span!("bouncer", session = %session, peer = %peer)
        } else {
            info_span!("bouncer", session = %session)
        }
    }
}
