//! # Reconciliation Sweep
//!
//! Repairs reminders whose queue task was lost. Queue mutations and store
//! writes are not transactional together, and the in-process queue does not
//! survive a restart, so the daemon sweeps at startup and periodically.
//!
//! - **Version**: 1.0.0
//! - **Since**: 1.2.0

use super::recurrence;
use super::scheduler::ReminderScheduler;
use crate::core::{QueueError, SchedulerError, StoreError};
use chrono::Utc;
use log::{debug, error, info, warn};
use std::time::Duration;
use tokio::sync::watch;

/// Counts of what one sweep did
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    pub checked: usize,
    /// Task still known to the queue
    pub healthy: usize,
    /// Lost task replaced by a fresh one
    pub recovered: usize,
    /// One-shot reminder whose fire time passed while its task was lost
    pub missed: usize,
    /// Recurring reminder whose next slot passes `upto`; deleted
    pub retired: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Repair {
    Healthy,
    Recovered,
    Missed,
    Retired,
}

pub struct Reconciler {
    scheduler: ReminderScheduler,
}

impl Reconciler {
    pub fn new(scheduler: ReminderScheduler) -> Self {
        Self { scheduler }
    }

    /// Check every scheduled reminder against the queue once
    pub async fn sweep(&self) -> ReconcileReport {
        let mut report = ReconcileReport::default();

        let scheduled = match self.scheduler.store().list_scheduled().await {
            Ok(scheduled) => scheduled,
            Err(e) => {
                error!("Reconcile sweep could not list reminders: {e}");
                report.failed += 1;
                return report;
            }
        };

        for reminder in scheduled {
            report.checked += 1;
            match self.reconcile_one(&reminder.id).await {
                Ok(Repair::Healthy) => report.healthy += 1,
                Ok(Repair::Recovered) => report.recovered += 1,
                Ok(Repair::Missed) => report.missed += 1,
                Ok(Repair::Retired) => {
                    report.retired += 1;
                    self.scheduler.locks().forget(&reminder.id);
                }
                Err(e) => {
                    report.failed += 1;
                    error!("Failed to reconcile reminder {}: {e}", reminder.id);
                }
            }
        }

        if report.checked > report.healthy {
            info!(
                "Reconcile sweep: {} checked, {} recovered, {} missed, {} retired, {} failed",
                report.checked, report.recovered, report.missed, report.retired, report.failed
            );
        } else {
            debug!("Reconcile sweep: {} reminder(s) healthy", report.healthy);
        }
        report
    }

    /// Sweep every `interval` until `shutdown` flips to `true`
    pub async fn run(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        // The first tick completes immediately; the startup sweep already ran
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sweep().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }

    async fn reconcile_one(&self, reminder_id: &str) -> Result<Repair, SchedulerError> {
        let _guard = self.scheduler.locks().lock(reminder_id).await;
        let store = self.scheduler.store();

        let mut reminder = match store.get_by_id(reminder_id).await {
            Ok(reminder) => reminder,
            Err(StoreError::NotFound(_)) => return Ok(Repair::Healthy),
            Err(e) => return Err(e.into()),
        };
        let Some(task_id) = reminder.task_id.clone() else {
            return Ok(Repair::Healthy);
        };

        match self.scheduler.inspect(&task_id).await {
            Ok(info) if info.state.is_live() => return Ok(Repair::Healthy),
            Ok(info) => debug!(
                "Task {task_id} of reminder {reminder_id} ended as {} without a follow-up",
                info.state
            ),
            Err(SchedulerError::Queue(QueueError::TaskNotFound(_))) => {
                debug!("Task {task_id} of reminder {reminder_id} is unknown to the queue")
            }
            Err(e) => return Err(e),
        }

        let now = Utc::now();
        if reminder.next_trigger_time > now {
            self.scheduler.enqueue_and_attach_locked(&reminder).await?;
            info!("Recovered lost task {task_id} of reminder {reminder_id}");
            return Ok(Repair::Recovered);
        }

        if !reminder.recurrence.is_recurring() {
            reminder.task_id = None;
            store.update(&reminder).await?;
            warn!(
                "One-shot reminder {reminder_id} missed its fire at {}",
                reminder.next_trigger_time
            );
            return Ok(Repair::Missed);
        }

        let (next, skipped) = recurrence::fast_forward(&reminder, now);
        if reminder.upto.is_some_and(|upto| next > upto) {
            store.delete(reminder_id).await?;
            info!("Reminder {reminder_id} expired while its task was lost, deleted");
            return Ok(Repair::Retired);
        }

        reminder.next_trigger_time = next;
        self.scheduler.enqueue_and_attach_locked(&reminder).await?;
        warn!(
            "Reminder {reminder_id} skipped {skipped} missed occurrence(s), next fire at {next}"
        );
        Ok(Repair::Recovered)
    }
}
