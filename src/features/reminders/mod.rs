//! # Reminders Feature
//!
//! Persisted reminders fired through the delayed task queue, with optional
//! recurrence and an `upto` cutoff.
//!
//! - [`ReminderScheduler`]: create / reschedule / cancel / inspect queue tasks
//! - [`ReminderWorker`]: handles fired tasks and advances recurrence
//! - [`Reconciler`]: repairs reminders whose task was lost
//!
//! - **Version**: 2.0.0
//! - **Since**: 0.1.0
//! - **Toggleable**: true
//!
//! ## Changelog
//! - 2.0.0: Queue-backed scheduling, recurrence units, reconciliation sweep
//! - 1.0.0: Polling scheduler

pub mod locks;
pub mod model;
pub mod reconcile;
pub mod recurrence;
pub mod scheduler;
pub mod store;
pub mod worker;

pub use locks::ReminderLocks;
pub use model::{Recurrence, Reminder, ReminderEdit};
pub use reconcile::{ReconcileReport, Reconciler};
pub use scheduler::{ReminderScheduler, SchedulingPolicy, REMINDER_TASK_TYPE};
pub use store::{MemoryReminderStore, ReminderStore};
pub use worker::{FireOutcome, ReminderWorker};
