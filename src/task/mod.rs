//! Task scheduler.
//!
//! Every reaction to an event runs as a [`Task`]: a registered, cancellable
//! unit of work with a numeric id. Tasks are admitted one per fixed interval
//! through a shared limiter, write back through the session Transport, and
//! leave the registry when their body returns by any path.
//!
//! Id 0 is reserved for untracked writes straight to the Transport.

mod sandbox;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use sitbot_proto::Message;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{Instrument, debug, info, warn};

use crate::config::SandboxConfig;
use crate::error::TaskError;
use crate::network::Transport;
use crate::network::limit::{self, Pacer};
use crate::pattern::PatternMatcher;
use crate::telemetry::{TaskTimer, spans};

/// Task handle, unique for the lifetime of a Scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct TaskId(pub u64);

impl TaskId {
    /// Writes tagged with this id go straight to the Transport.
    pub const DIRECT: TaskId = TaskId(0);
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A running unit of work.
pub struct Task {
    id: TaskId,
    name: String,
    start: DateTime<Utc>,
    command: RwLock<String>,
    lines: AtomicU32,
    cancel: CancellationToken,
    transport: Transport,
    sandbox: Arc<SandboxConfig>,
}

impl Task {
    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    /// The command text, after pattern rewriting.
    pub fn command(&self) -> String {
        self.command.read().clone()
    }

    /// Frames written through this task so far.
    pub fn lines(&self) -> u32 {
        self.lines.load(Ordering::Relaxed)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves when the task is killed or its scheduler closes.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    /// Write a frame on behalf of this task.
    pub async fn write(&self, msg: Message) -> Result<(), TaskError> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(TaskError::Cancelled),
            sent = self.transport.send(msg) => sent?,
        }
        self.lines.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn info(&self) -> TaskInfo {
        TaskInfo {
            id: self.id,
            name: self.name.clone(),
            command: self.command(),
            start: self.start,
            lines: self.lines(),
        }
    }
}

/// Point-in-time view of a running task.
#[derive(Debug, Clone, Serialize)]
pub struct TaskInfo {
    pub id: TaskId,
    pub name: String,
    pub command: String,
    pub start: DateTime<Utc>,
    pub lines: u32,
}

struct Entry {
    task: Arc<Task>,
    /// Cancelled once the body has returned and the entry is gone.
    done: CancellationToken,
}

/// Admission, registry and write-back for a session's tasks.
pub struct Scheduler {
    tasks: RwLock<HashMap<TaskId, Entry>>,
    next_id: AtomicU64,
    admission: Pacer,
    transport: Transport,
    sandbox: Arc<SandboxConfig>,
    cancel: CancellationToken,
    tracker: TaskTracker,
}

impl Scheduler {
    pub fn new(
        transport: Transport,
        admission_interval: Duration,
        sandbox: Arc<SandboxConfig>,
        parent: &CancellationToken,
    ) -> Arc<Self> {
        Arc::new(Self {
            tasks: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            admission: limit::pacer(admission_interval),
            transport,
            sandbox,
            cancel: parent.child_token(),
            tracker: TaskTracker::new(),
        })
    }

    /// Register a task and schedule `body` to run once admitted.
    ///
    /// With `patterns`, the command is first rewritten through the rule set
    /// and the task ends silently when nothing matches.
    pub fn run<F, Fut>(
        self: &Arc<Self>,
        name: impl Into<String>,
        command: impl Into<String>,
        patterns: Option<Arc<PatternMatcher>>,
        body: F,
    ) -> TaskId
    where
        F: FnOnce(Arc<Task>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
    {
        let id = TaskId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let name = name.into();
        let span = spans::task(id, &name);
        let task = Arc::new(Task {
            id,
            name,
            start: Utc::now(),
            command: RwLock::new(command.into()),
            lines: AtomicU32::new(0),
            cancel: self.cancel.child_token(),
            transport: self.transport.clone(),
            sandbox: Arc::clone(&self.sandbox),
        });
        let done = CancellationToken::new();
        self.tasks.write().insert(
            id,
            Entry {
                task: Arc::clone(&task),
                done: done.clone(),
            },
        );

        let scheduler = Arc::clone(self);
        self.tracker.spawn(
            async move {
                scheduler.execute(&task, patterns, body).await;
                scheduler.tasks.write().remove(&id);
                done.cancel();
            }
            .instrument(span),
        );
        id
    }

    async fn execute<F, Fut>(&self, task: &Arc<Task>, patterns: Option<Arc<PatternMatcher>>, body: F)
    where
        F: FnOnce(Arc<Task>) -> Fut,
        Fut: Future<Output = Result<(), TaskError>>,
    {
        if let Some(patterns) = patterns {
            let input = task.command();
            let rewritten = patterns.apply(&input);
            if rewritten.is_empty() {
                return;
            }
            info!(input = %input, command = %rewritten, "matched");
            *task.command.write() = rewritten;
        }
        if task.command.read().is_empty() {
            return;
        }
        if !limit::wait(&self.admission, &task.cancel).await {
            debug!("cancelled before admission");
            return;
        }

        let _timer = TaskTimer::new(task.command());
        match body(Arc::clone(task)).await {
            Ok(()) => debug!(lines = task.lines(), "finished"),
            Err(TaskError::Cancelled) => debug!(lines = task.lines(), "cancelled"),
            Err(e) => warn!(
                command = %task.command(),
                error = %e,
                code = e.error_code(),
                "task failed"
            ),
        }
    }

    /// Write `msg` through task `id`, or directly for [`TaskId::DIRECT`].
    pub async fn write(&self, id: TaskId, msg: Message) -> Result<(), TaskError> {
        if id == TaskId::DIRECT {
            return Ok(self.transport.send(msg).await?);
        }
        let task = self
            .tasks
            .read()
            .get(&id)
            .map(|e| Arc::clone(&e.task))
            .ok_or(TaskError::NotFound(id))?;
        task.write(msg).await
    }

    /// Cancel task `id` and wait until its body has exited.
    pub async fn kill(&self, id: TaskId) -> Result<(), TaskError> {
        let (task, done) = {
            let tasks = self.tasks.read();
            let entry = tasks.get(&id).ok_or(TaskError::NotFound(id))?;
            (Arc::clone(&entry.task), entry.done.clone())
        };
        task.cancel.cancel();
        done.cancelled().await;
        info!(tid = %id, "task killed");
        Ok(())
    }

    /// Snapshot of running tasks, ordered by id.
    pub fn tasks(&self) -> Vec<TaskInfo> {
        let mut tasks: Vec<TaskInfo> = self.tasks.read().values().map(|e| e.task.info()).collect();
        tasks.sort_by_key(|t| t.id);
        tasks
    }

    pub fn len(&self) -> usize {
        self.tasks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cancel every task and wait for all of them.
    pub async fn close(&self) {
        self.cancel.cancel();
        self.tracker.close();
        self.tracker.wait().await;
    }
}
