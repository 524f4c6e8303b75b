//! # Features
//!
//! - `queue`: delayed task queue contract, in-process backend and server
//! - `reminders`: reminder model, scheduling, firing and reconciliation
//! - `notifications`: channel notifiers and the fail-fast dispatcher

pub mod notifications;
pub mod queue;
pub mod reminders;

pub use notifications::{
    Channel, ContactBook, NotificationDispatcher, NotificationEnvelope, NotificationRequest,
    NotificationService, Notifier, NotifiersConfig, Recipient,
};
pub use queue::{InMemoryTaskQueue, QueueServer, ServeMux, ServerConfig, TaskHandler, TaskQueue};
pub use reminders::{
    Reconciler, Recurrence, Reminder, ReminderLocks, ReminderScheduler, ReminderStore,
    ReminderWorker, SchedulingPolicy,
};
