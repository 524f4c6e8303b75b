//! # Error Types
//!
//! Typed error taxonomy for the reminder control plane, the task queue,
//! the reminder store and notification delivery.
//!
//! - **Version**: 1.1.0
//! - **Since**: 1.0.0
//!
//! ## Changelog
//! - 1.1.0: Added `QueueError::Timeout` and `StoreError::Conflict` for optimistic updates
//! - 1.0.0: Initial taxonomy

use chrono::{DateTime, Utc};

/// Errors raised by the task queue client
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// No task with this ID exists in the queue
    #[error("task not found: {0}")]
    TaskNotFound(String),

    /// The named queue does not exist
    #[error("queue not found: {0}")]
    QueueNotFound(String),

    /// A task with the same unique key is still locked
    #[error("duplicate task: {0}")]
    Duplicate(String),

    /// The task is being processed and cannot be deleted
    #[error("task {0} is active")]
    TaskActive(String),

    /// The queue call did not finish within the configured timeout
    #[error("queue operation timed out: {0}")]
    Timeout(&'static str),

    /// Any other backend failure
    #[error("queue backend error: {0}")]
    Backend(String),
}

impl QueueError {
    /// True for the "already gone" classes that deletion treats as success
    pub fn is_not_found(&self) -> bool {
        matches!(self, QueueError::TaskNotFound(_) | QueueError::QueueNotFound(_))
    }
}

/// Errors raised by reminder persistence
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("reminder not found: {0}")]
    NotFound(String),

    /// Optimistic version check failed
    #[error("reminder {id} was modified concurrently (expected version {expected}, found {found})")]
    Conflict { id: String, expected: u64, found: u64 },

    #[error("store backend error: {0}")]
    Backend(String),
}

impl From<sqlite::Error> for StoreError {
    fn from(e: sqlite::Error) -> Self {
        StoreError::Backend(e.to_string())
    }
}

/// Errors returned by the reminder scheduler
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// The reminder's `upto` cutoff is already in the past
    #[error("reminder {id} expired at {upto}")]
    ExpiredReminder { id: String, upto: DateTime<Utc> },

    /// The reminder's next trigger time is already in the past
    #[error("reminder {id} has a trigger time in the past ({next})")]
    PastTrigger { id: String, next: DateTime<Utc> },

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// The reminder could not be encoded as a task payload
    #[error("payload encoding failed: {0}")]
    Payload(#[from] serde_json::Error),
}

impl SchedulerError {
    /// True when the error is a validation rejection (nothing was enqueued)
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            SchedulerError::ExpiredReminder { .. } | SchedulerError::PastTrigger { .. }
        )
    }
}

/// Errors returned by the notification dispatcher
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    /// A channel failed; remaining channels were not attempted
    #[error("delivery via {channel} failed: {source}")]
    Delivery {
        channel: String,
        #[source]
        source: anyhow::Error,
    },
}

impl NotifyError {
    /// Channel tag of the failing notifier
    pub fn channel(&self) -> &str {
        match self {
            NotifyError::Delivery { channel, .. } => channel,
        }
    }
}
