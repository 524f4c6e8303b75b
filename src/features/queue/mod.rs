//! # Delayed Task Queue
//!
//! Client contract for a delayed, at-least-once task queue together with an
//! in-process backend and the server loop that hands due tasks to handlers.
//!
//! - [`TaskQueue`]: enqueue / inspect / cancel / delete primitives
//! - [`memory::InMemoryTaskQueue`]: in-process backend
//! - [`server::QueueServer`]: polling worker pool with per-type handlers
//!
//! - **Version**: 1.2.0
//! - **Since**: 1.0.0
//! - **Toggleable**: false
//!
//! ## Changelog
//! - 1.2.0: Unique-key locks and completed-task retention
//! - 1.1.0: Cooperative cancellation of active tasks
//! - 1.0.0: Initial release

pub mod memory;
pub mod server;

use crate::core::QueueError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub use memory::{InMemoryTaskQueue, QueueStats};
pub use server::{QueueServer, ServeMux, ServerConfig, TaskHandler};

/// Lifecycle state of a queued task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskState {
    /// Waiting for its delay to elapse
    Scheduled,
    /// Due and waiting for a free worker
    Pending,
    /// Handed to a handler
    Active,
    /// Failed, waiting for the next attempt
    Retry,
    /// Failed or cancelled with no attempts left
    Archived,
    /// Handled successfully, kept until retention expires
    Completed,
}

impl TaskState {
    /// True while the task can still be delivered to a handler
    pub fn is_live(&self) -> bool {
        matches!(
            self,
            TaskState::Scheduled | TaskState::Pending | TaskState::Active | TaskState::Retry
        )
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskState::Scheduled => write!(f, "scheduled"),
            TaskState::Pending => write!(f, "pending"),
            TaskState::Active => write!(f, "active"),
            TaskState::Retry => write!(f, "retry"),
            TaskState::Archived => write!(f, "archived"),
            TaskState::Completed => write!(f, "completed"),
        }
    }
}

impl std::str::FromStr for TaskState {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.to_lowercase().as_str() {
            "scheduled" => Ok(TaskState::Scheduled),
            "pending" => Ok(TaskState::Pending),
            "active" => Ok(TaskState::Active),
            "retry" => Ok(TaskState::Retry),
            "archived" => Ok(TaskState::Archived),
            "completed" => Ok(TaskState::Completed),
            _ => Err(anyhow::anyhow!("Invalid task state: {}", s)),
        }
    }
}

/// A task as submitted by a producer
#[derive(Debug, Clone)]
pub struct NewTask {
    pub task_type: String,
    pub payload: Vec<u8>,
    /// Key used for the unique lock; defaults to the payload bytes
    pub unique_key: Option<String>,
}

impl NewTask {
    pub fn new(task_type: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            task_type: task_type.into(),
            payload,
            unique_key: None,
        }
    }

    pub fn with_unique_key(mut self, key: impl Into<String>) -> Self {
        self.unique_key = Some(key.into());
        self
    }
}

/// A task as delivered to a handler
#[derive(Debug, Clone)]
pub struct Task {
    pub id: String,
    pub queue: String,
    pub task_type: String,
    pub payload: Vec<u8>,
    /// Attempts already made before this one
    pub retried: u32,
    pub max_retry: u32,
}

/// Enqueue policy for a single task
#[derive(Debug, Clone)]
pub struct TaskOptions {
    /// Caller-chosen ID; the queue generates one when absent
    pub task_id: Option<String>,
    /// Automatic retries after a failed attempt
    pub retry: u32,
    pub queue: String,
    /// How long a completed task stays inspectable
    pub retention: Duration,
    /// Delay before the task becomes due
    pub delay: Duration,
    /// Reject duplicates of the same unique key while the lock lives
    pub unique_ttl: Option<Duration>,
    /// Per-attempt handler deadline
    pub timeout: Option<Duration>,
}

impl Default for TaskOptions {
    fn default() -> Self {
        Self {
            task_id: None,
            retry: 0,
            queue: "default".to_string(),
            retention: Duration::ZERO,
            delay: Duration::ZERO,
            unique_ttl: None,
            timeout: None,
        }
    }
}

impl TaskOptions {
    pub fn queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = queue.into();
        self
    }

    pub fn retry(mut self, retry: u32) -> Self {
        self.retry = retry;
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    pub fn unique(mut self, ttl: Duration) -> Self {
        self.unique_ttl = Some(ttl);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn task_id(mut self, id: impl Into<String>) -> Self {
        self.task_id = Some(id.into());
        self
    }
}

/// Inspection snapshot of a task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskInfo {
    pub id: String,
    pub queue: String,
    pub task_type: String,
    pub state: TaskState,
    pub max_retry: u32,
    pub retried: u32,
    pub last_error: Option<String>,
    /// When the task becomes (or became) due
    pub next_process_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Client contract for a delayed task queue
///
/// Delivery is at-least-once. Implementations must be safe to share across
/// tasks, so every method takes `&self`.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Enqueue a task; it becomes due after `options.delay`
    async fn enqueue(&self, task: NewTask, options: TaskOptions) -> Result<TaskInfo, QueueError>;

    /// Look up a task in a queue
    async fn get_task_info(&self, queue: &str, task_id: &str) -> Result<TaskInfo, QueueError>;

    /// Ask the handler of an active task to stop; a no-op for other states
    async fn cancel_processing(&self, task_id: &str) -> Result<(), QueueError>;

    /// Remove a task that is not currently active
    async fn delete_task(&self, queue: &str, task_id: &str) -> Result<(), QueueError>;
}
