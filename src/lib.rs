// Core layer - shared types and configuration
pub mod core;

// Features layer - queue, reminders, notifications
pub mod features;

// Infrastructure
pub mod database;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export core config
pub use core::Config;

pub use database::Database;

pub use features::{
    // Notifications
    Channel, NotificationDispatcher, NotificationService, Notifier, NotifiersConfig,
    // Queue
    InMemoryTaskQueue, QueueServer, ServeMux, ServerConfig, TaskQueue,
    // Reminders
    Reconciler, Recurrence, Reminder, ReminderScheduler, ReminderStore, ReminderWorker,
    SchedulingPolicy,
};
