//! In-process delayed task queue.
//!
//! [`InMemoryTaskQueue`] keeps every queue in one map guarded by a single
//! lock. Tasks are not persisted: after a restart the reminder reconciler
//! re-enqueues whatever the store still considers scheduled.
//!
//! Task states move `scheduled -> pending -> active -> completed | archived`,
//! with `retry` in between when a failed task still has attempts left.

use super::{NewTask, Task, TaskInfo, TaskOptions, TaskQueue, TaskState};
use crate::core::QueueError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::debug;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;

struct TaskRecord {
    info: TaskInfo,
    payload: Vec<u8>,
    retention: Duration,
    timeout: Option<Duration>,
    unique_key: Option<String>,
    cancel: Option<Arc<Notify>>,
    archived_at: Option<DateTime<Utc>>,
}

/// Archived tasks stay inspectable at least this long
const ARCHIVE_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

struct UniqueLock {
    task_id: String,
    expires_at: DateTime<Utc>,
}

#[derive(Default)]
struct QueueState {
    queues: HashSet<String>,
    tasks: HashMap<String, TaskRecord>,
    unique: HashMap<String, UniqueLock>,
}

impl QueueState {
    fn release_unique(&mut self, key: Option<&str>, task_id: &str) {
        if let Some(key) = key {
            if self.unique.get(key).is_some_and(|lock| lock.task_id == task_id) {
                self.unique.remove(key);
            }
        }
    }

    /// Scheduled tasks whose delay elapsed are reported as pending
    fn promote_due(&mut self, now: DateTime<Utc>) {
        for record in self.tasks.values_mut() {
            if record.info.state == TaskState::Scheduled && record.info.next_process_at <= now {
                record.info.state = TaskState::Pending;
            }
        }
    }
}

/// A task handed to the server together with its execution controls
pub struct LeasedTask {
    pub task: Task,
    pub timeout: Option<Duration>,
    /// Notified when the task is cancelled while active
    pub cancel: Arc<Notify>,
}

/// Per-queue task counts
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub scheduled: usize,
    pub pending: usize,
    pub active: usize,
    pub retry: usize,
    pub archived: usize,
    pub completed: usize,
}

impl QueueStats {
    /// Tasks that will still be delivered
    pub fn live(&self) -> usize {
        self.scheduled + self.pending + self.active + self.retry
    }
}

/// In-process implementation of [`TaskQueue`]
#[derive(Default)]
pub struct InMemoryTaskQueue {
    state: Mutex<QueueState>,
}

fn poison_err<T>(_: PoisonError<T>) -> QueueError {
    QueueError::Backend("task queue lock poisoned".to_string())
}

/// Convert a std duration to chrono, saturating at one century
pub(crate) fn to_chrono(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or_else(|_| chrono::Duration::days(36_500))
}

impl InMemoryTaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a queue backend with the given queue names already registered
    pub fn with_queues<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let state = QueueState {
            queues: names.into_iter().map(Into::into).collect(),
            ..QueueState::default()
        };
        Self {
            state: Mutex::new(state),
        }
    }

    /// Move up to `limit` due tasks into the active state
    pub fn lease_due(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<LeasedTask>, QueueError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut state = self.state.lock().map_err(poison_err)?;
        state.promote_due(now);

        let mut due: Vec<(DateTime<Utc>, String)> = state
            .tasks
            .values()
            .filter(|r| {
                matches!(r.info.state, TaskState::Pending | TaskState::Retry)
                    && r.info.next_process_at <= now
            })
            .map(|r| (r.info.next_process_at, r.info.id.clone()))
            .collect();
        due.sort();
        due.truncate(limit);

        let mut leased = Vec::with_capacity(due.len());
        for (_, id) in due {
            if let Some(record) = state.tasks.get_mut(&id) {
                let cancel = Arc::new(Notify::new());
                record.info.state = TaskState::Active;
                record.cancel = Some(cancel.clone());
                leased.push(LeasedTask {
                    task: Task {
                        id: record.info.id.clone(),
                        queue: record.info.queue.clone(),
                        task_type: record.info.task_type.clone(),
                        payload: record.payload.clone(),
                        retried: record.info.retried,
                        max_retry: record.info.max_retry,
                    },
                    timeout: record.timeout,
                    cancel,
                });
            }
        }
        Ok(leased)
    }

    /// Record a successful attempt
    pub fn mark_completed(&self, task_id: &str, now: DateTime<Utc>) -> Result<(), QueueError> {
        let mut guard = self.state.lock().map_err(poison_err)?;
        let state = &mut *guard;
        let Some(record) = state.tasks.get_mut(task_id) else {
            return Ok(());
        };
        if record.info.state != TaskState::Active {
            // Cancelled while the handler was finishing
            return Ok(());
        }
        record.info.state = TaskState::Completed;
        record.info.completed_at = Some(now);
        record.cancel = None;
        let unique_key = record.unique_key.clone();
        let keep = !record.retention.is_zero();
        state.release_unique(unique_key.as_deref(), task_id);
        if !keep {
            state.tasks.remove(task_id);
        }
        Ok(())
    }

    /// Record a failed attempt; returns the state the task moved to
    pub fn mark_failed(
        &self,
        task_id: &str,
        error: &str,
        retry_delay: Duration,
        now: DateTime<Utc>,
    ) -> Result<TaskState, QueueError> {
        let mut guard = self.state.lock().map_err(poison_err)?;
        let state = &mut *guard;
        let Some(record) = state.tasks.get_mut(task_id) else {
            return Err(QueueError::TaskNotFound(task_id.to_string()));
        };
        if record.info.state != TaskState::Active {
            return Ok(record.info.state);
        }
        record.info.last_error = Some(error.to_string());
        record.cancel = None;
        if record.info.retried < record.info.max_retry {
            record.info.retried += 1;
            record.info.state = TaskState::Retry;
            record.info.next_process_at = now + to_chrono(retry_delay);
            return Ok(TaskState::Retry);
        }
        record.info.state = TaskState::Archived;
        record.archived_at = Some(now);
        let unique_key = record.unique_key.clone();
        state.release_unique(unique_key.as_deref(), task_id);
        Ok(TaskState::Archived)
    }

    /// Drop finished tasks whose retention has elapsed; returns how many
    ///
    /// Archived tasks are kept for their retention, but never less than
    /// [`ARCHIVE_RETENTION`].
    pub fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, QueueError> {
        let mut state = self.state.lock().map_err(poison_err)?;
        let before = state.tasks.len();
        state.tasks.retain(|_, r| match (r.info.state, r.info.completed_at, r.archived_at) {
            (TaskState::Completed, Some(done), _) => done + to_chrono(r.retention) > now,
            (TaskState::Archived, _, Some(archived)) => {
                archived + to_chrono(r.retention.max(ARCHIVE_RETENTION)) > now
            }
            _ => true,
        });
        state.unique.retain(|_, lock| lock.expires_at > now);
        Ok(before - state.tasks.len())
    }

    /// Count tasks by state for one queue
    pub fn queue_stats(&self, queue: &str) -> Result<QueueStats, QueueError> {
        let mut state = self.state.lock().map_err(poison_err)?;
        if !state.queues.contains(queue) {
            return Err(QueueError::QueueNotFound(queue.to_string()));
        }
        state.promote_due(Utc::now());
        let mut stats = QueueStats::default();
        for record in state.tasks.values().filter(|r| r.info.queue == queue) {
            match record.info.state {
                TaskState::Scheduled => stats.scheduled += 1,
                TaskState::Pending => stats.pending += 1,
                TaskState::Active => stats.active += 1,
                TaskState::Retry => stats.retry += 1,
                TaskState::Archived => stats.archived += 1,
                TaskState::Completed => stats.completed += 1,
            }
        }
        Ok(stats)
    }
}

#[async_trait]
impl TaskQueue for InMemoryTaskQueue {
    async fn enqueue(&self, task: NewTask, options: TaskOptions) -> Result<TaskInfo, QueueError> {
        let now = Utc::now();
        let mut guard = self.state.lock().map_err(poison_err)?;
        let state = &mut *guard;

        let id = options
            .task_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        if state.tasks.contains_key(&id) {
            return Err(QueueError::Duplicate(id));
        }

        let unique_key = match options.unique_ttl {
            Some(ttl) => {
                let key = format!(
                    "{}:{}:{}",
                    options.queue,
                    task.task_type,
                    task.unique_key
                        .clone()
                        .unwrap_or_else(|| String::from_utf8_lossy(&task.payload).into_owned())
                );
                if state.unique.get(&key).is_some_and(|lock| lock.expires_at > now) {
                    return Err(QueueError::Duplicate(key));
                }
                state.unique.insert(
                    key.clone(),
                    UniqueLock {
                        task_id: id.clone(),
                        expires_at: now + to_chrono(ttl),
                    },
                );
                Some(key)
            }
            None => None,
        };

        state.queues.insert(options.queue.clone());

        let info = TaskInfo {
            id: id.clone(),
            queue: options.queue.clone(),
            task_type: task.task_type,
            state: if options.delay.is_zero() {
                TaskState::Pending
            } else {
                TaskState::Scheduled
            },
            max_retry: options.retry,
            retried: 0,
            last_error: None,
            next_process_at: now + to_chrono(options.delay),
            completed_at: None,
        };
        state.tasks.insert(
            id.clone(),
            TaskRecord {
                info: info.clone(),
                payload: task.payload,
                retention: options.retention,
                timeout: options.timeout,
                unique_key,
                cancel: None,
                archived_at: None,
            },
        );
        debug!(
            "Enqueued task {} ({}) on {} due {}",
            id, info.task_type, info.queue, info.next_process_at
        );
        Ok(info)
    }

    async fn get_task_info(&self, queue: &str, task_id: &str) -> Result<TaskInfo, QueueError> {
        let mut state = self.state.lock().map_err(poison_err)?;
        if !state.queues.contains(queue) {
            return Err(QueueError::QueueNotFound(queue.to_string()));
        }
        state.promote_due(Utc::now());
        state
            .tasks
            .get(task_id)
            .filter(|r| r.info.queue == queue)
            .map(|r| r.info.clone())
            .ok_or_else(|| QueueError::TaskNotFound(task_id.to_string()))
    }

    async fn cancel_processing(&self, task_id: &str) -> Result<(), QueueError> {
        let mut guard = self.state.lock().map_err(poison_err)?;
        let state = &mut *guard;
        let Some(record) = state.tasks.get_mut(task_id) else {
            return Ok(());
        };
        if record.info.state != TaskState::Active {
            return Ok(());
        }
        record.info.state = TaskState::Archived;
        record.info.last_error = Some("canceled".to_string());
        record.archived_at = Some(Utc::now());
        if let Some(cancel) = record.cancel.take() {
            cancel.notify_one();
        }
        let unique_key = record.unique_key.clone();
        state.release_unique(unique_key.as_deref(), task_id);
        debug!("Cancelled active task {task_id}");
        Ok(())
    }

    async fn delete_task(&self, queue: &str, task_id: &str) -> Result<(), QueueError> {
        let mut guard = self.state.lock().map_err(poison_err)?;
        let state = &mut *guard;
        if !state.queues.contains(queue) {
            return Err(QueueError::QueueNotFound(queue.to_string()));
        }
        let record = state
            .tasks
            .get(task_id)
            .filter(|r| r.info.queue == queue)
            .ok_or_else(|| QueueError::TaskNotFound(task_id.to_string()))?;
        if record.info.state == TaskState::Active {
            return Err(QueueError::TaskActive(task_id.to_string()));
        }
        let unique_key = record.unique_key.clone();
        state.tasks.remove(task_id);
        state.release_unique(unique_key.as_deref(), task_id);
        debug!("Deleted task {task_id} from {queue}");
        Ok(())
    }
}
