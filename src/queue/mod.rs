//! Bounded priority task queue drained by a fixed worker pool.
//!
//! [`TaskQueue`] registers units of deferred work, orders them by
//! priority (FIFO within a tier), and executes them on `max_workers`
//! concurrent workers. Task records track the full lifecycle
//! (`Pending → Running → {Completed | Failed}`, `Cancelled` from
//! `Pending` only) and feed rolling aggregate statistics.
//!
//! # Shutdown
//!
//! Each worker holds a [`CancellationToken`] checked on every loop
//! iteration, so [`stop()`](TaskQueue::stop) terminates idle workers
//! within one wakeup rather than relying on task-cancellation
//! exceptions. In-flight operations always run to completion; nothing
//! is dequeued after stop is requested.

pub mod task;

use std::cmp::Ordering as CmpOrdering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::telemetry;
use crate::{MuninnError, Result};

pub use task::{Task, TaskOperation, TaskOwner, TaskPriority, TaskStatus};

/// Configuration for the task queue and its worker pool.
///
/// ```rust
/// # use muninn::QueueConfig;
/// # use std::time::Duration;
/// let config = QueueConfig::new()
///     .max_workers(4)
///     .max_queue_size(100);
/// ```
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Number of concurrent workers. Default: 4.
    pub max_workers: usize,
    /// Maximum number of queued (pending) tasks. Default: 100.
    pub max_queue_size: usize,
    /// Polling interval for [`TaskQueue::wait_for_task`]. Default: 25ms.
    pub poll_interval: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_workers: 4,
            max_queue_size: 100,
            poll_interval: Duration::from_millis(25),
        }
    }
}

impl QueueConfig {
    /// Create a config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of concurrent workers.
    pub fn max_workers(mut self, n: usize) -> Self {
        self.max_workers = n;
        self
    }

    /// Set the maximum number of queued tasks.
    pub fn max_queue_size(mut self, n: usize) -> Self {
        self.max_queue_size = n;
        self
    }

    /// Set the polling interval used by `wait_for_task`.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Validate field ranges, returning one message per violation.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.max_workers == 0 {
            errors.push("max_workers must be at least 1".to_string());
        }
        if self.max_queue_size == 0 {
            errors.push("max_queue_size must be at least 1".to_string());
        }
        if self.poll_interval.is_zero() {
            errors.push("poll_interval must be greater than zero".to_string());
        }
        errors
    }
}

/// Aggregate queue statistics, as returned by
/// [`TaskQueue::get_queue_stats`].
#[derive(Debug, Clone)]
pub struct QueueStats {
    /// Pending tasks awaiting execution.
    pub queue_size: usize,
    /// Configured queue capacity.
    pub max_queue_size: usize,
    /// Workers currently executing a task.
    pub active_workers: usize,
    /// Configured pool size.
    pub max_workers: usize,
    /// Whether the worker pool is running.
    pub running: bool,
    /// Tasks ever registered (all states).
    pub total_tasks: usize,
    pub completed_tasks: u64,
    pub failed_tasks: u64,
    pub cancelled_tasks: u64,
    /// Running average of `completed_at - created_at` over completed
    /// tasks, in seconds.
    pub avg_completion_secs: f64,
}

/// Heap entry: orders by priority (descending), then arrival (ascending).
struct QueuedEntry {
    priority: TaskPriority,
    seq: u64,
    id: Uuid,
    operation: TaskOperation,
}

impl PartialEq for QueuedEntry {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for QueuedEntry {}

impl PartialOrd for QueuedEntry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedEntry {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // BinaryHeap pops the greatest entry: higher priority wins,
        // then the lower (earlier) arrival sequence.
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Default)]
struct StatsInner {
    completed: u64,
    failed: u64,
    cancelled: u64,
    avg_completion_secs: f64,
}

struct QueueInner {
    heap: Mutex<BinaryHeap<QueuedEntry>>,
    tasks: RwLock<HashMap<Uuid, Task>>,
    notify: Notify,
    seq: AtomicU64,
    /// Tasks in `Pending` status. The heap may briefly hold more entries
    /// than this (cancelled tasks are discarded lazily on pop), so
    /// capacity and `queue_size` are accounted here, not on the heap.
    pending: AtomicUsize,
    active_workers: AtomicUsize,
    stats: Mutex<StatsInner>,
}

/// Bounded priority queue of deferred work, drained by a fixed pool of
/// workers.
///
/// Construct with [`TaskQueue::new`], then call
/// [`start()`](Self::start) to spawn the pool. Tasks may be added before
/// the pool is running; they execute once it starts.
pub struct TaskQueue {
    config: QueueConfig,
    inner: Arc<QueueInner>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    token: Mutex<CancellationToken>,
    running: AtomicBool,
}

impl TaskQueue {
    /// Create a task queue, validating the configuration.
    pub fn new(config: QueueConfig) -> Result<Self> {
        let errors = config.validate();
        if !errors.is_empty() {
            return Err(MuninnError::Configuration(errors.join("; ")));
        }
        Ok(Self {
            config,
            inner: Arc::new(QueueInner {
                heap: Mutex::new(BinaryHeap::new()),
                tasks: RwLock::new(HashMap::new()),
                notify: Notify::new(),
                seq: AtomicU64::new(0),
                pending: AtomicUsize::new(0),
                active_workers: AtomicUsize::new(0),
                stats: Mutex::new(StatsInner::default()),
            }),
            workers: Mutex::new(Vec::new()),
            token: Mutex::new(CancellationToken::new()),
            running: AtomicBool::new(false),
        })
    }

    /// Register a task and enqueue it for execution.
    ///
    /// Fails with [`MuninnError::QueueFull`] when the queue already holds
    /// `max_queue_size` pending tasks; the task is not registered in that
    /// case. Cancelled tasks stop counting against capacity immediately,
    /// even though their heap entries are discarded lazily.
    pub fn add_task(
        &self,
        name: impl Into<String>,
        operation: TaskOperation,
        priority: TaskPriority,
        owner: TaskOwner,
    ) -> Result<Uuid> {
        let mut heap = self.inner.heap.lock();
        if self.inner.pending.load(Ordering::SeqCst) >= self.config.max_queue_size {
            return Err(MuninnError::QueueFull {
                capacity: self.config.max_queue_size,
            });
        }

        let task = Task::new(name.into(), priority, owner);
        let id = task.id;
        self.inner.tasks.write().insert(id, task);
        self.inner.pending.fetch_add(1, Ordering::SeqCst);
        heap.push(QueuedEntry {
            priority,
            seq: self.inner.seq.fetch_add(1, Ordering::Relaxed),
            id,
            operation,
        });
        drop(heap);

        self.inner.notify.notify_one();
        debug!(task_id = %id, ?priority, "task enqueued");
        Ok(id)
    }

    /// Cancel a task that has not started yet.
    ///
    /// Returns `true` only if the task was still `Pending`; a claimed or
    /// terminal task is left untouched and `false` is returned. In-flight
    /// work is never preempted.
    pub fn cancel_task(&self, id: Uuid) -> bool {
        let mut tasks = self.inner.tasks.write();
        match tasks.get_mut(&id) {
            Some(task) if task.status == TaskStatus::Pending => {
                task.status = TaskStatus::Cancelled;
                task.completed_at = Some(Instant::now());
                drop(tasks);
                // The heap entry stays behind (discarded lazily on pop)
                // but no longer consumes queue capacity.
                self.inner.pending.fetch_sub(1, Ordering::SeqCst);
                self.inner.stats.lock().cancelled += 1;
                metrics::counter!(telemetry::TASKS_TOTAL, "status" => "cancelled").increment(1);
                debug!(task_id = %id, "task cancelled");
                true
            }
            _ => false,
        }
    }

    /// Read-only snapshot of a task's record, or `None` if unknown.
    pub fn get_task_status(&self, id: Uuid) -> Option<Task> {
        self.inner.tasks.read().get(&id).cloned()
    }

    /// Snapshots of all tasks registered for the given owner identifiers.
    ///
    /// Matches on whichever of `user_id` / `chat_id` the filter sets.
    pub fn tasks_for_owner(&self, owner: TaskOwner) -> Vec<Task> {
        self.inner
            .tasks
            .read()
            .values()
            .filter(|t| {
                (owner.user_id.is_none() || t.owner.user_id == owner.user_id)
                    && (owner.chat_id.is_none() || t.owner.chat_id == owner.chat_id)
            })
            .cloned()
            .collect()
    }

    /// Poll until the task reaches a terminal state or `timeout` elapses.
    ///
    /// Returns the stored result only for a `Completed` task; `None`
    /// covers failure, cancellation, unknown ids, and timeout alike —
    /// callers distinguish those via
    /// [`get_task_status`](Self::get_task_status).
    pub async fn wait_for_task(&self, id: Uuid, timeout: Duration) -> Option<Value> {
        // A timeout too large to represent as a deadline means "no deadline".
        let deadline = Instant::now().checked_add(timeout);
        loop {
            match self.get_task_status(id) {
                None => return None,
                Some(task) if task.status.is_terminal() => {
                    return match task.status {
                        TaskStatus::Completed => task.result,
                        _ => None,
                    };
                }
                Some(_) => {}
            }

            let sleep_for = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return None;
                    }
                    self.config.poll_interval.min(deadline - now)
                }
                None => self.config.poll_interval,
            };
            tokio::time::sleep(sleep_for).await;
        }
    }

    /// Spawn the worker pool. Idempotent: a no-op while already running.
    ///
    /// # Panics
    ///
    /// Requires a tokio runtime context (called within an async fn).
    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let token = CancellationToken::new();
        *self.token.lock() = token.clone();

        let mut workers = self.workers.lock();
        for worker_id in 0..self.config.max_workers {
            let inner = Arc::clone(&self.inner);
            let token = token.clone();
            workers.push(tokio::spawn(worker_loop(inner, token, worker_id)));
        }
        debug!(workers = self.config.max_workers, "worker pool started");
    }

    /// Stop the worker pool and wait for it to wind down.
    ///
    /// Signals every worker's cancellation token, wakes workers blocked
    /// waiting for new work, and joins them. In-flight operations finish
    /// naturally; no new task is dequeued afterwards. Idempotent.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.token.lock().cancel();
        self.inner.notify.notify_waiters();

        let handles: Vec<JoinHandle<()>> = self.workers.lock().drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }
        debug!("worker pool stopped");
    }

    /// Aggregate statistics snapshot.
    pub fn get_queue_stats(&self) -> QueueStats {
        let stats = self.inner.stats.lock();
        QueueStats {
            queue_size: self.inner.pending.load(Ordering::SeqCst),
            max_queue_size: self.config.max_queue_size,
            active_workers: self.inner.active_workers.load(Ordering::SeqCst),
            max_workers: self.config.max_workers,
            running: self.running.load(Ordering::SeqCst),
            total_tasks: self.inner.tasks.read().len(),
            completed_tasks: stats.completed,
            failed_tasks: stats.failed,
            cancelled_tasks: stats.cancelled,
            avg_completion_secs: stats.avg_completion_secs,
        }
    }
}

/// One worker: dequeue the highest-priority entry, execute it, record
/// the outcome, repeat until the token fires.
async fn worker_loop(inner: Arc<QueueInner>, token: CancellationToken, worker_id: usize) {
    loop {
        if token.is_cancelled() {
            break;
        }

        let entry = inner.heap.lock().pop();
        let Some(entry) = entry else {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = inner.notify.notified() => {}
            }
            continue;
        };

        // Claim: cancelled-while-queued entries are discarded here.
        let claimed = {
            let mut tasks = inner.tasks.write();
            match tasks.get_mut(&entry.id) {
                Some(task) if task.status == TaskStatus::Pending => {
                    task.status = TaskStatus::Running;
                    task.started_at = Some(Instant::now());
                    inner.pending.fetch_sub(1, Ordering::SeqCst);
                    true
                }
                _ => false,
            }
        };
        if !claimed {
            continue;
        }

        debug!(task_id = %entry.id, worker_id, "task started");
        inner.active_workers.fetch_add(1, Ordering::SeqCst);
        let outcome = run_operation(entry.operation).await;
        inner.active_workers.fetch_sub(1, Ordering::SeqCst);
        record_outcome(&inner, entry.id, outcome);
    }
}

/// Execute the operation; blocking callables run off the cooperative
/// scheduler. A panic inside a blocking callable surfaces as a failure,
/// never as a worker crash.
async fn run_operation(operation: TaskOperation) -> std::result::Result<Value, String> {
    match operation {
        TaskOperation::Async(f) => f().await.map_err(|e| e.to_string()),
        TaskOperation::Blocking(f) => match tokio::task::spawn_blocking(f).await {
            Ok(result) => result.map_err(|e| e.to_string()),
            Err(join_error) => Err(format!("blocking operation panicked: {join_error}")),
        },
    }
}

fn record_outcome(inner: &QueueInner, id: Uuid, outcome: std::result::Result<Value, String>) {
    let completed_at = Instant::now();
    let mut tasks = inner.tasks.write();
    let Some(task) = tasks.get_mut(&id) else {
        return;
    };
    task.completed_at = Some(completed_at);

    match outcome {
        Ok(value) => {
            task.status = TaskStatus::Completed;
            task.result = Some(value);
            let elapsed = completed_at.duration_since(task.created_at).as_secs_f64();
            drop(tasks);

            let mut stats = inner.stats.lock();
            stats.completed += 1;
            // Incremental running average; no rescan of historical tasks.
            stats.avg_completion_secs +=
                (elapsed - stats.avg_completion_secs) / stats.completed as f64;

            metrics::counter!(telemetry::TASKS_TOTAL, "status" => "completed").increment(1);
            metrics::histogram!(telemetry::TASK_DURATION_SECONDS).record(elapsed);
            debug!(task_id = %id, elapsed_secs = elapsed, "task completed");
        }
        Err(message) => {
            task.status = TaskStatus::Failed;
            task.error = Some(message.clone());
            drop(tasks);

            inner.stats.lock().failed += 1;
            metrics::counter!(telemetry::TASKS_TOTAL, "status" => "failed").increment(1);
            warn!(task_id = %id, error = %message, "task failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(priority: TaskPriority, seq: u64) -> QueuedEntry {
        QueuedEntry {
            priority,
            seq,
            id: Uuid::new_v4(),
            operation: TaskOperation::from_blocking(|| Ok(Value::Null)),
        }
    }

    #[test]
    fn heap_orders_by_priority_then_arrival() {
        let mut heap = BinaryHeap::new();
        heap.push(entry(TaskPriority::Low, 0));
        heap.push(entry(TaskPriority::Urgent, 1));
        heap.push(entry(TaskPriority::Normal, 2));
        heap.push(entry(TaskPriority::Low, 3));

        let order: Vec<(TaskPriority, u64)> = std::iter::from_fn(|| heap.pop())
            .map(|e| (e.priority, e.seq))
            .collect();
        assert_eq!(
            order,
            vec![
                (TaskPriority::Urgent, 1),
                (TaskPriority::Normal, 2),
                (TaskPriority::Low, 0),
                (TaskPriority::Low, 3),
            ]
        );
    }

    #[test]
    fn config_rejects_zero_fields() {
        let errors = QueueConfig::new()
            .max_workers(0)
            .max_queue_size(0)
            .poll_interval(Duration::ZERO)
            .validate();
        assert_eq!(errors.len(), 3);
    }
}
