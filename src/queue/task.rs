//! Task records: priority, status state machine, and the opaque operation.

use std::fmt;
use std::future::Future;
use std::time::Instant;

use futures_util::future::BoxFuture;
use serde_json::Value;
use uuid::Uuid;

use crate::error::TaskError;

/// Scheduling priority. Higher priorities are dequeued first; arrival
/// order breaks ties within a tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TaskPriority {
    Low,
    Normal,
    High,
    Urgent,
}

/// Task lifecycle status.
///
/// Transitions are monotonic: `Pending → Running → {Completed | Failed}`,
/// with `Cancelled` reachable only from `Pending`. A terminal status is
/// never left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    /// Whether this status is terminal.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Optional owner identifiers attached to a task.
///
/// Used purely for lookup and filtering; they carry no authorization
/// semantics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskOwner {
    pub user_id: Option<i64>,
    pub chat_id: Option<i64>,
}

impl TaskOwner {
    /// Owner with both identifiers set.
    pub fn new(user_id: i64, chat_id: i64) -> Self {
        Self {
            user_id: Some(user_id),
            chat_id: Some(chat_id),
        }
    }

    /// Owner identified by user id only.
    pub fn user(user_id: i64) -> Self {
        Self {
            user_id: Some(user_id),
            chat_id: None,
        }
    }
}

/// The unit of deferred work handed to the worker pool.
///
/// Arguments are captured by the closure at
/// [`add_task`](crate::TaskQueue::add_task) time. Asynchronous operations
/// are awaited in place on the worker; blocking ones run on a separate
/// blocking thread so a slow synchronous call cannot stall the workers'
/// event loop.
pub enum TaskOperation {
    /// Awaited in place on the worker.
    Async(Box<dyn FnOnce() -> BoxFuture<'static, std::result::Result<Value, TaskError>> + Send>),
    /// Executed via `spawn_blocking`, off the cooperative scheduler.
    Blocking(Box<dyn FnOnce() -> std::result::Result<Value, TaskError> + Send>),
}

impl TaskOperation {
    /// Wrap an asynchronous callable.
    pub fn from_async<F, Fut>(f: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<Value, TaskError>> + Send + 'static,
    {
        Self::Async(Box::new(
            move || -> BoxFuture<'static, std::result::Result<Value, TaskError>> {
                Box::pin(f())
            },
        ))
    }

    /// Wrap a blocking callable.
    pub fn from_blocking<F>(f: F) -> Self
    where
        F: FnOnce() -> std::result::Result<Value, TaskError> + Send + 'static,
    {
        Self::Blocking(Box::new(f))
    }
}

impl fmt::Debug for TaskOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Async(_) => f.write_str("TaskOperation::Async"),
            Self::Blocking(_) => f.write_str("TaskOperation::Blocking"),
        }
    }
}

/// Read-only record of a task's metadata and outcome.
///
/// Status, timestamps, result, and error are each written exactly once
/// by the worker that executes the task; everything else is immutable
/// after creation. Records are retained for the process lifetime.
#[derive(Debug, Clone)]
pub struct Task {
    pub id: Uuid,
    pub name: String,
    pub priority: TaskPriority,
    pub status: TaskStatus,
    pub created_at: Instant,
    pub started_at: Option<Instant>,
    pub completed_at: Option<Instant>,
    /// Opaque result payload; set only on success.
    pub result: Option<Value>,
    /// Stringified failure description; set only on failure.
    pub error: Option<String>,
    pub owner: TaskOwner,
}

impl Task {
    pub(crate) fn new(name: String, priority: TaskPriority, owner: TaskOwner) -> Self {
        Self {
            id: Uuid::new_v4(),
            name,
            priority,
            status: TaskStatus::Pending,
            created_at: Instant::now(),
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
            owner,
        }
    }
}
