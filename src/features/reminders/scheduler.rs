//! # Reminder Scheduler
//!
//! Owns the reminder to queue-task lifecycle: validate and enqueue, reschedule
//! after an edit, cancel, and inspect. The scheduler is the only writer of
//! `Reminder::task_id`.
//!
//! Every mutation runs under the reminder's entry in [`ReminderLocks`], and
//! every queue call is bounded by the configured queue timeout.
//!
//! - **Version**: 2.0.0
//! - **Since**: 0.1.0
//!
//! ## Changelog
//! - 2.0.0: Delayed-queue backed scheduling replaces the polling loop
//! - 1.1.0: Optimistic version checks on reschedule
//! - 1.0.0: Initial scheduler

use super::locks::ReminderLocks;
use super::model::Reminder;
use super::store::ReminderStore;
use crate::core::{Config, QueueError, SchedulerError, StoreError};
use crate::features::queue::{NewTask, TaskInfo, TaskOptions, TaskQueue};
use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Task type of a reminder fire
pub const REMINDER_TASK_TYPE: &str = "reminder:fire";

/// Queue placement and limits for reminder tasks
#[derive(Debug, Clone)]
pub struct SchedulingPolicy {
    pub queue: String,
    pub retention: Duration,
    /// Zero disables the unique lock
    pub unique_ttl: Duration,
    pub queue_timeout: Duration,
}

impl Default for SchedulingPolicy {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl SchedulingPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            queue: config.queue_name.clone(),
            retention: config.task_retention,
            unique_ttl: config.unique_ttl,
            queue_timeout: config.queue_timeout,
        }
    }
}

#[derive(Clone)]
pub struct ReminderScheduler {
    queue: Arc<dyn TaskQueue>,
    store: Arc<dyn ReminderStore>,
    locks: Arc<ReminderLocks>,
    policy: SchedulingPolicy,
}

impl ReminderScheduler {
    pub fn new(
        queue: Arc<dyn TaskQueue>,
        store: Arc<dyn ReminderStore>,
        locks: Arc<ReminderLocks>,
        policy: SchedulingPolicy,
    ) -> Self {
        Self {
            queue,
            store,
            locks,
            policy,
        }
    }

    pub fn store(&self) -> &Arc<dyn ReminderStore> {
        &self.store
    }

    pub fn locks(&self) -> &Arc<ReminderLocks> {
        &self.locks
    }

    pub fn policy(&self) -> &SchedulingPolicy {
        &self.policy
    }

    /// Validate a reminder and enqueue its next fire
    ///
    /// Returns the new task ID. The store is not written on success. A
    /// reminder whose `upto` or trigger lies in the past is rejected and any
    /// task it still has is cancelled.
    pub async fn create_task(&self, reminder: &Reminder) -> Result<String, SchedulerError> {
        let _guard = self.locks.lock(&reminder.id).await;
        self.create_task_locked(reminder).await
    }

    /// Reschedule after an edit and persist the new task ID
    ///
    /// `reminder` must carry the version it was read at; a stale edit is
    /// rejected before the queue is touched.
    pub async fn update_task(&self, reminder: &Reminder) -> Result<String, SchedulerError> {
        let _guard = self.locks.lock(&reminder.id).await;

        let stored = self.store.get_by_id(&reminder.id).await?;
        if stored.version != reminder.version {
            return Err(StoreError::Conflict {
                id: reminder.id.clone(),
                expected: reminder.version,
                found: stored.version,
            }
            .into());
        }

        if let Some(ref old_task) = stored.task_id {
            if let Err(e) = self.remove_task(old_task).await {
                warn!(
                    "Could not cancel task {old_task} of reminder {} before rescheduling: {e}",
                    reminder.id
                );
            }
        }

        let mut next = reminder.clone();
        next.task_id = stored.task_id;
        let saved = self.enqueue_and_attach_locked(&next).await?;
        saved
            .task_id
            .ok_or_else(|| StoreError::Backend(format!("reminder {} lost its task id", saved.id)).into())
    }

    /// Cancel the reminder's outstanding task and clear `task_id`
    ///
    /// Succeeds without touching the queue when nothing is outstanding. A
    /// task the queue no longer knows counts as cancelled.
    pub async fn cancel_task(&self, reminder_id: &str) -> Result<(), SchedulerError> {
        let _guard = self.locks.lock(reminder_id).await;
        self.cancel_locked(reminder_id).await
    }

    /// Queue state of a task
    pub async fn inspect(&self, task_id: &str) -> Result<TaskInfo, SchedulerError> {
        let queue = self.policy.queue.as_str();
        match self
            .bounded("get_task_info", self.queue.get_task_info(queue, task_id))
            .await
        {
            Ok(info) => Ok(info),
            Err(QueueError::QueueNotFound(_)) => {
                Err(QueueError::TaskNotFound(task_id.to_string()).into())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Store a new reminder and schedule its first fire
    ///
    /// A rejected schedule leaves the reminder stored without a task.
    pub async fn schedule_new(&self, reminder: Reminder) -> Result<Reminder, SchedulerError> {
        let _guard = self.locks.lock(&reminder.id).await;
        let stored = self.store.create(&reminder).await?;
        self.enqueue_and_attach_locked(&stored).await
    }

    pub(crate) async fn create_task_locked(
        &self,
        reminder: &Reminder,
    ) -> Result<String, SchedulerError> {
        let now = Utc::now();

        if let Some(err) = rejection(reminder, now) {
            warn!("Not scheduling reminder {}: {err}", reminder.id);
            match self.cancel_locked(&reminder.id).await {
                Ok(()) | Err(SchedulerError::Store(StoreError::NotFound(_))) => {}
                Err(e) => warn!(
                    "Failed to cancel outstanding task of rejected reminder {}: {e}",
                    reminder.id
                ),
            }
            return Err(err);
        }

        self.enqueue(reminder, now).await
    }

    /// Enqueue, then persist the new task ID on the stored record
    ///
    /// If the write fails the fresh task is removed again so it cannot fire
    /// for a reminder that does not reference it.
    pub(crate) async fn enqueue_and_attach_locked(
        &self,
        reminder: &Reminder,
    ) -> Result<Reminder, SchedulerError> {
        let task_id = self.create_task_locked(reminder).await?;
        self.attach_locked(reminder, task_id).await
    }

    /// Enqueue the next occurrence of a reminder whose task just fired
    ///
    /// The record keeps pointing at the fired task until the new one is
    /// attached. A rejected or failed enqueue leaves it there, so the repair
    /// sweep sees a finished task and fast-forwards the reminder.
    pub(crate) async fn reschedule_fired_locked(
        &self,
        reminder: &Reminder,
    ) -> Result<Reminder, SchedulerError> {
        let now = Utc::now();
        if let Some(err) = rejection(reminder, now) {
            return Err(err);
        }
        let task_id = self.enqueue(reminder, now).await?;
        self.attach_locked(reminder, task_id).await
    }

    async fn attach_locked(
        &self,
        reminder: &Reminder,
        task_id: String,
    ) -> Result<Reminder, SchedulerError> {
        let mut attached = reminder.clone();
        attached.task_id = Some(task_id.clone());
        match self.store.update(&attached).await {
            Ok(saved) => Ok(saved),
            Err(e) => {
                error!(
                    "Failed to persist task {task_id} on reminder {}: {e}",
                    reminder.id
                );
                if let Err(cleanup) = self.remove_task(&task_id).await {
                    error!("Orphaned task {task_id} could not be removed: {cleanup}");
                }
                Err(e.into())
            }
        }
    }

    pub(crate) async fn cancel_locked(&self, reminder_id: &str) -> Result<(), SchedulerError> {
        let mut reminder = self.store.get_by_id(reminder_id).await?;
        let Some(task_id) = reminder.task_id.clone() else {
            debug!("Reminder {reminder_id} has no outstanding task");
            return Ok(());
        };

        self.remove_task(&task_id).await?;

        reminder.task_id = None;
        self.store.update(&reminder).await?;
        info!("Cancelled task {task_id} of reminder {reminder_id}");
        Ok(())
    }

    async fn enqueue(&self, reminder: &Reminder, now: DateTime<Utc>) -> Result<String, SchedulerError> {
        let payload = serde_json::to_vec(reminder)?;
        let delay = (reminder.next_trigger_time - now)
            .to_std()
            .unwrap_or(Duration::ZERO);

        let mut options = TaskOptions::default()
            .queue(self.policy.queue.as_str())
            .retry(0)
            .retention(self.policy.retention)
            .delay(delay);
        if !self.policy.unique_ttl.is_zero() {
            options = options.unique(self.policy.unique_ttl);
        }

        let task = NewTask::new(REMINDER_TASK_TYPE, payload).with_unique_key(reminder.unique_key());
        let info = self.bounded("enqueue", self.queue.enqueue(task, options)).await?;

        info!(
            "Scheduled reminder {} as task {} on {} (fires at {}, occurrence {})",
            reminder.id, info.id, info.queue, reminder.next_trigger_time, reminder.occurrence
        );
        Ok(info.id)
    }

    /// Stop and delete a queue task; "already gone" is success
    async fn remove_task(&self, task_id: &str) -> Result<(), QueueError> {
        match self
            .bounded("cancel_processing", self.queue.cancel_processing(task_id))
            .await
        {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }

        match self
            .bounded(
                "delete_task",
                self.queue.delete_task(&self.policy.queue, task_id),
            )
            .await
        {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => {
                debug!("Task {task_id} already gone from {}", self.policy.queue);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn bounded<T, F>(&self, op: &'static str, call: F) -> Result<T, QueueError>
    where
        F: Future<Output = Result<T, QueueError>>,
    {
        match tokio::time::timeout(self.policy.queue_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(QueueError::Timeout(op)),
        }
    }
}

/// Why `reminder` cannot be enqueued at `now`, if it cannot
fn rejection(reminder: &Reminder, now: DateTime<Utc>) -> Option<SchedulerError> {
    match reminder.upto {
        Some(upto) if upto < now => Some(SchedulerError::ExpiredReminder {
            id: reminder.id.clone(),
            upto,
        }),
        _ if reminder.next_trigger_time < now => Some(SchedulerError::PastTrigger {
            id: reminder.id.clone(),
            next: reminder.next_trigger_time,
        }),
        _ => None,
    }
}
