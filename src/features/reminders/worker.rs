//! # Reminder Worker
//!
//! Handles fired `reminder:fire` tasks: delivers the notification, advances
//! the recurrence, and schedules the next occurrence or retires the reminder.
//!
//! The worker only acts on live state. The fired payload names the reminder,
//! but the record is re-read under its lock, and a fire whose task is no
//! longer the reminder's current task is dropped as stale.
//!
//! - **Version**: 2.0.0
//! - **Since**: 0.1.0
//!
//! ## Changelog
//! - 2.0.0: Queue-driven fires with live-state checks
//! - 1.0.0: Polling delivery loop

use super::model::Reminder;
use super::recurrence;
use super::scheduler::ReminderScheduler;
use crate::core::StoreError;
use crate::features::notifications::NotificationService;
use crate::features::queue::{Task, TaskHandler};
use anyhow::Context;
use async_trait::async_trait;
use log::{debug, error, info, warn};

/// What a fire did to its reminder
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FireOutcome {
    /// The task no longer belongs to a live reminder
    Stale,
    /// A one-shot reminder fired and stays stored without a task
    Completed,
    /// The next occurrence was enqueued as this task
    Rescheduled(String),
    /// The next occurrence would pass `upto`; the reminder was deleted
    Retired,
}

#[derive(Clone)]
pub struct ReminderWorker {
    scheduler: ReminderScheduler,
    notifications: NotificationService,
}

impl ReminderWorker {
    pub fn new(scheduler: ReminderScheduler, notifications: NotificationService) -> Self {
        Self {
            scheduler,
            notifications,
        }
    }

    /// Process one fired task
    pub async fn handle_fired(&self, task: &Task) -> anyhow::Result<FireOutcome> {
        let snapshot: Reminder = serde_json::from_slice(&task.payload)
            .with_context(|| format!("task {} carries an undecodable reminder", task.id))?;
        let reminder_id = snapshot.id.clone();

        let guard = self.scheduler.locks().lock(&reminder_id).await;
        let outcome = self.fire_locked(&reminder_id, task).await;
        drop(guard);

        if matches!(outcome, Ok(FireOutcome::Retired)) {
            self.scheduler.locks().forget(&reminder_id);
        }
        outcome
    }

    async fn fire_locked(&self, reminder_id: &str, task: &Task) -> anyhow::Result<FireOutcome> {
        let store = self.scheduler.store();

        let live = match store.get_by_id(reminder_id).await {
            Ok(reminder) => reminder,
            Err(StoreError::NotFound(_)) => {
                info!("Reminder {reminder_id} is gone, dropping fired task {}", task.id);
                return Ok(FireOutcome::Stale);
            }
            Err(e) => {
                error!(
                    "Failed to load reminder {reminder_id} for task {} (phase: load): {e}",
                    task.id
                );
                return Err(e.into());
            }
        };

        if live.task_id.as_deref() != Some(task.id.as_str()) {
            info!(
                "Task {} is stale for reminder {reminder_id} (current task: {}), skipping",
                task.id,
                live.task_id.as_deref().unwrap_or("none")
            );
            return Ok(FireOutcome::Stale);
        }

        match self.notifications.send(live.notification_request()).await {
            Ok(()) => debug!(
                "Delivered reminder {reminder_id} occurrence {}",
                live.occurrence + 1
            ),
            Err(e) => warn!(
                "Delivery of reminder {reminder_id} (task {}) failed: {e:#}",
                task.id
            ),
        }

        self.advance(live, task).await
    }

    async fn advance(&self, mut reminder: Reminder, task: &Task) -> anyhow::Result<FireOutcome> {
        let store = self.scheduler.store();

        if !reminder.recurrence.is_recurring() {
            reminder.triggered_time = Some(reminder.next_trigger_time);
            reminder.occurrence += 1;
            reminder.task_id = None;
            store.update(&reminder).await.map_err(|e| {
                error!(
                    "Failed to persist fired reminder {} for task {} (phase: complete): {e}",
                    reminder.id, task.id
                );
                e
            })?;
            info!("One-shot reminder {} fired", reminder.id);
            return Ok(FireOutcome::Completed);
        }

        let next = recurrence::next_after(&reminder);
        if let Some(upto) = reminder.upto {
            if next > upto {
                store.delete(&reminder.id).await.map_err(|e| {
                    error!(
                        "Failed to delete expired reminder {} for task {} (phase: retire): {e}",
                        reminder.id, task.id
                    );
                    e
                })?;
                info!(
                    "Reminder {} retired after {} occurrence(s): next fire {next} is past {upto}",
                    reminder.id,
                    reminder.occurrence + 1
                );
                return Ok(FireOutcome::Retired);
            }
        }

        reminder.triggered_time = Some(reminder.next_trigger_time);
        reminder.next_trigger_time = next;
        reminder.occurrence += 1;
        // Keeps the fired task until the next one is attached
        reminder.task_id = Some(task.id.clone());
        let advanced = store.update(&reminder).await.map_err(|e| {
            error!(
                "Failed to persist advanced reminder {} for task {} (phase: advance): {e}",
                reminder.id, task.id
            );
            e
        })?;

        let attached = self
            .scheduler
            .reschedule_fired_locked(&advanced)
            .await
            .map_err(|e| {
                error!(
                    "Could not schedule occurrence {} of reminder {} after task {}, \
                     leaving it to the repair sweep (phase: reschedule): {e}",
                    advanced.occurrence + 1,
                    advanced.id,
                    task.id
                );
                e
            })?;

        let next_task = attached.task_id.unwrap_or_default();
        Ok(FireOutcome::Rescheduled(next_task))
    }
}

#[async_trait]
impl TaskHandler for ReminderWorker {
    async fn process(&self, task: &Task) -> anyhow::Result<()> {
        self.handle_fired(task).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{QueueError, SchedulerError};
    use crate::features::notifications::{Channel, NotificationDispatcher, Notifier};
    use crate::features::queue::{
        InMemoryTaskQueue, NewTask, QueueServer, ServeMux, ServerConfig, TaskOptions, TaskQueue,
        TaskState,
    };
    use crate::features::reminders::locks::ReminderLocks;
    use crate::features::reminders::reconcile::Reconciler;
    use crate::features::reminders::scheduler::{SchedulingPolicy, REMINDER_TASK_TYPE};
    use crate::features::reminders::store::{MemoryReminderStore, ReminderStore};
    use crate::features::reminders::Recurrence;
    use crate::test_support::{reminder_at, FlakyQueue, MemoryContactBook, RecordingNotifier};
    use chrono::{DateTime, Duration, Utc};
    use std::sync::Arc;

    struct Pipeline {
        queue: Arc<FlakyQueue>,
        store: Arc<MemoryReminderStore>,
        scheduler: ReminderScheduler,
        worker: ReminderWorker,
        email: Arc<RecordingNotifier>,
        sms: Arc<RecordingNotifier>,
    }

    fn pipeline_with(email: Arc<RecordingNotifier>) -> Pipeline {
        let queue = Arc::new(FlakyQueue::new(InMemoryTaskQueue::with_queues(["reminders"])));
        let store = Arc::new(MemoryReminderStore::new());
        let scheduler = ReminderScheduler::new(
            queue.clone(),
            store.clone(),
            Arc::new(ReminderLocks::new()),
            SchedulingPolicy::default(),
        );
        let sms = RecordingNotifier::new(Channel::Sms);
        let notifiers: Vec<Arc<dyn Notifier>> = vec![email.clone(), sms.clone()];
        let dispatcher = Arc::new(NotificationDispatcher::new(notifiers, vec![Channel::Email]));
        let service =
            NotificationService::new(dispatcher, Arc::new(MemoryContactBook::default()));
        let worker = ReminderWorker::new(scheduler.clone(), service);
        Pipeline {
            queue,
            store,
            scheduler,
            worker,
            email,
            sms,
        }
    }

    fn pipeline() -> Pipeline {
        pipeline_with(RecordingNotifier::new(Channel::Email))
    }

    impl Pipeline {
        /// Lease the next due task as if its time had come, and hand it to the worker
        async fn fire_next(&self, at: DateTime<Utc>) -> (Task, anyhow::Result<FireOutcome>) {
            // Enqueue delays are measured from the wall clock, so allow a little slack
            let at = at + Duration::seconds(1);
            let mut leased = self.queue.inner().lease_due(at, 1).unwrap();
            assert_eq!(leased.len(), 1, "expected a due task at {at}");
            let task = leased.remove(0).task;
            let outcome = self.worker.handle_fired(&task).await;
            self.queue.inner().mark_completed(&task.id, at).unwrap();
            (task, outcome)
        }
    }

    fn soon() -> DateTime<Utc> {
        Utc::now() + Duration::minutes(1)
    }

    #[tokio::test]
    async fn test_daily_reminder_retires_on_fourth_fire() {
        let p = pipeline();
        let start = soon();
        let reminder = reminder_at(Recurrence::Daily, start).until(start + Duration::days(3));
        let reminder = p.scheduler.schedule_new(reminder).await.unwrap();

        for day in 0..3 {
            let (_, outcome) = p.fire_next(start + Duration::days(day)).await;
            assert!(matches!(outcome.unwrap(), FireOutcome::Rescheduled(_)));
            let stored = p.store.get_by_id(&reminder.id).await.unwrap();
            assert_eq!(stored.occurrence, day as u32 + 1);
            assert_eq!(stored.triggered_time, Some(start + Duration::days(day)));
            assert_eq!(stored.next_trigger_time, start + Duration::days(day + 1));
        }

        let (_, outcome) = p.fire_next(start + Duration::days(3)).await;
        assert_eq!(outcome.unwrap(), FireOutcome::Retired);
        assert!(matches!(
            p.store.get_by_id(&reminder.id).await,
            Err(StoreError::NotFound(_))
        ));
        assert_eq!(p.email.attempts(), 4);
        assert_eq!(p.queue.inner().queue_stats("reminders").unwrap().live(), 0);
    }

    #[tokio::test]
    async fn test_once_fires_without_reschedule() {
        let p = pipeline();
        let reminder = p
            .scheduler
            .schedule_new(reminder_at(Recurrence::Once, soon()))
            .await
            .unwrap();

        let (_, outcome) = p.fire_next(soon() + Duration::minutes(1)).await;
        assert_eq!(outcome.unwrap(), FireOutcome::Completed);

        let stored = p.store.get_by_id(&reminder.id).await.unwrap();
        assert_eq!(stored.occurrence, 1);
        assert_eq!(stored.triggered_time, Some(reminder.next_trigger_time));
        assert!(stored.task_id.is_none());
        assert_eq!(p.queue.inner().queue_stats("reminders").unwrap().live(), 0);
    }

    #[tokio::test]
    async fn test_rescheduled_reminder_ignores_old_fire() {
        let p = pipeline();
        let reminder = p
            .scheduler
            .schedule_new(reminder_at(Recurrence::Hour, soon()))
            .await
            .unwrap();

        // Lease the original task before the edit lands
        let mut leased = p.queue.inner().lease_due(soon() + Duration::minutes(1), 1).unwrap();
        let old = leased.remove(0).task;
        p.queue.inner().mark_completed(&old.id, Utc::now()).unwrap();

        let mut edited = reminder.clone();
        edited.next_trigger_time = soon() + Duration::hours(5);
        p.scheduler.update_task(&edited).await.unwrap();

        let outcome = p.worker.handle_fired(&old).await.unwrap();
        assert_eq!(outcome, FireOutcome::Stale);
        assert_eq!(p.email.attempts(), 0);
        let stored = p.store.get_by_id(&reminder.id).await.unwrap();
        assert_eq!(stored.occurrence, 0);
    }

    #[tokio::test]
    async fn test_fire_for_deleted_reminder_is_stale() {
        let p = pipeline();
        let reminder = p
            .scheduler
            .schedule_new(reminder_at(Recurrence::Daily, soon()))
            .await
            .unwrap();
        p.store.delete(&reminder.id).await.unwrap();

        let (_, outcome) = p.fire_next(soon() + Duration::minutes(1)).await;
        assert_eq!(outcome.unwrap(), FireOutcome::Stale);
        assert_eq!(p.email.attempts(), 0);
    }

    #[tokio::test]
    async fn test_failed_email_skips_sms_and_still_advances() {
        let p = pipeline_with(RecordingNotifier::failing(Channel::Email, "mailbox full"));
        let reminder = reminder_at(Recurrence::Weekly, soon()).with_channels(["email", "sms"]);
        let reminder = p.scheduler.schedule_new(reminder).await.unwrap();

        let (_, outcome) = p.fire_next(soon() + Duration::minutes(1)).await;

        assert!(matches!(outcome.unwrap(), FireOutcome::Rescheduled(_)));
        assert_eq!(p.email.attempts(), 1);
        assert_eq!(p.sms.attempts(), 0);
        let stored = p.store.get_by_id(&reminder.id).await.unwrap();
        assert_eq!(stored.occurrence, 1);
    }

    #[tokio::test]
    async fn test_reschedule_failure_is_returned_and_logged() {
        let p = pipeline();
        let reminder = p
            .scheduler
            .schedule_new(reminder_at(Recurrence::Daily, soon()))
            .await
            .unwrap();
        p.queue.fail("enqueue", "queue unavailable");

        let (task, outcome) = p.fire_next(soon() + Duration::minutes(1)).await;

        let err = outcome.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SchedulerError>(),
            Some(SchedulerError::Queue(_))
        ));
        let stored = p.store.get_by_id(&reminder.id).await.unwrap();
        assert_eq!(stored.occurrence, 1);
        assert_eq!(stored.task_id.as_deref(), Some(task.id.as_str()));
    }

    #[tokio::test]
    async fn test_sweep_reschedules_after_failed_enqueue() {
        let p = pipeline();
        let reminder = p
            .scheduler
            .schedule_new(reminder_at(Recurrence::Daily, soon()))
            .await
            .unwrap();
        p.queue.fail("enqueue", "queue unavailable");

        let (fired, outcome) = p.fire_next(soon() + Duration::minutes(1)).await;
        assert!(outcome.is_err());

        // Same backend and store, queue reachable again
        let healthy = ReminderScheduler::new(
            p.queue.inner().clone(),
            p.store.clone(),
            Arc::new(ReminderLocks::new()),
            SchedulingPolicy::default(),
        );
        let report = Reconciler::new(healthy).sweep().await;
        assert_eq!(report.checked, 1);
        assert_eq!(report.recovered, 1);

        let stored = p.store.get_by_id(&reminder.id).await.unwrap();
        let next_task = stored.task_id.clone().unwrap();
        assert_ne!(next_task, fired.id);
        assert_eq!(stored.next_trigger_time, reminder.next_trigger_time + Duration::days(1));
        let info = p
            .queue
            .inner()
            .get_task_info("reminders", &next_task)
            .await
            .unwrap();
        assert!(info.state.is_live());
    }

    #[tokio::test]
    async fn test_late_fire_is_fast_forwarded_by_sweep() {
        let p = pipeline();
        let late = reminder_at(Recurrence::Minutes, Utc::now() - Duration::minutes(5)).every(2);
        let stored = p.store.create(&late).await.unwrap();
        let payload = serde_json::to_vec(&stored).unwrap();
        let info = p
            .queue
            .inner()
            .enqueue(
                NewTask::new(REMINDER_TASK_TYPE, payload),
                TaskOptions::default().queue("reminders"),
            )
            .await
            .unwrap();
        let mut attached = stored.clone();
        attached.task_id = Some(info.id.clone());
        p.store.update(&attached).await.unwrap();

        let (fired, outcome) = p.fire_next(Utc::now()).await;
        let err = outcome.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SchedulerError>(),
            Some(SchedulerError::PastTrigger { .. })
        ));
        assert_eq!(p.email.attempts(), 1);
        let stored = p.store.get_by_id(&late.id).await.unwrap();
        assert_eq!(stored.occurrence, 1);
        assert_eq!(stored.task_id.as_deref(), Some(fired.id.as_str()));

        let report = Reconciler::new(p.scheduler.clone()).sweep().await;
        assert_eq!(report.recovered, 1);
        let stored = p.store.get_by_id(&late.id).await.unwrap();
        assert!(stored.next_trigger_time > Utc::now());
        assert_ne!(stored.task_id.as_deref(), Some(fired.id.as_str()));
        assert_eq!(p.queue.inner().queue_stats("reminders").unwrap().live(), 1);
    }

    #[tokio::test]
    async fn test_cancel_waits_for_in_flight_fire() {
        let p = pipeline_with(RecordingNotifier::stalled(
            Channel::Email,
            std::time::Duration::from_millis(200),
        ));
        let reminder = p
            .scheduler
            .schedule_new(reminder_at(Recurrence::Daily, soon()))
            .await
            .unwrap();
        let mut leased = p.queue.inner().lease_due(soon() + Duration::minutes(1), 1).unwrap();
        let task = leased.remove(0).task;
        let fired_id = task.id.clone();

        let worker = p.worker.clone();
        let fire = tokio::spawn(async move { worker.handle_fired(&task).await });
        while p.email.attempts() == 0 {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }

        // Delivery is in progress and holds the reminder lock
        p.scheduler.cancel_task(&reminder.id).await.unwrap();

        let outcome = fire.await.unwrap().unwrap();
        let next_task = match outcome {
            FireOutcome::Rescheduled(id) => id,
            other => panic!("expected a reschedule, got {other:?}"),
        };
        // The cancel ran second, so it removed the follow-up task
        let err = p
            .queue
            .inner()
            .get_task_info("reminders", &next_task)
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::TaskNotFound(_)));
        let stored = p.store.get_by_id(&reminder.id).await.unwrap();
        assert!(stored.task_id.is_none());
        assert_eq!(stored.occurrence, 1);

        p.queue.inner().mark_completed(&fired_id, Utc::now()).unwrap();
        assert_eq!(p.queue.inner().queue_stats("reminders").unwrap().live(), 0);
    }

    #[tokio::test]
    async fn test_update_during_fire_is_rejected_as_stale() {
        let p = pipeline_with(RecordingNotifier::stalled(
            Channel::Email,
            std::time::Duration::from_millis(200),
        ));
        let reminder = p
            .scheduler
            .schedule_new(reminder_at(Recurrence::Daily, soon()))
            .await
            .unwrap();
        let mut leased = p.queue.inner().lease_due(soon() + Duration::minutes(1), 1).unwrap();
        let task = leased.remove(0).task;
        let fired_id = task.id.clone();

        let worker = p.worker.clone();
        let fire = tokio::spawn(async move { worker.handle_fired(&task).await });
        while p.email.attempts() == 0 {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }

        let mut edited = reminder.clone();
        edited.next_trigger_time = soon() + Duration::hours(5);
        let err = p.scheduler.update_task(&edited).await.unwrap_err();
        assert!(matches!(err, SchedulerError::Store(StoreError::Conflict { .. })));

        let outcome = fire.await.unwrap().unwrap();
        let next_task = match outcome {
            FireOutcome::Rescheduled(id) => id,
            other => panic!("expected a reschedule, got {other:?}"),
        };
        let stored = p.store.get_by_id(&reminder.id).await.unwrap();
        assert_eq!(stored.task_id.as_deref(), Some(next_task.as_str()));

        p.queue.inner().mark_completed(&fired_id, Utc::now()).unwrap();
        assert_eq!(p.queue.inner().queue_stats("reminders").unwrap().live(), 1);
    }

    #[tokio::test]
    async fn test_undecodable_payload_is_an_error() {
        let p = pipeline();
        let task = Task {
            id: "t-1".to_string(),
            queue: "reminders".to_string(),
            task_type: REMINDER_TASK_TYPE.to_string(),
            payload: b"not json".to_vec(),
            retried: 0,
            max_retry: 0,
        };
        assert!(p.worker.handle_fired(&task).await.is_err());
    }

    #[tokio::test]
    async fn test_server_delivers_due_reminder() {
        let p = pipeline();
        let reminder = reminder_at(Recurrence::Once, Utc::now() + Duration::milliseconds(300));
        let reminder = p.scheduler.schedule_new(reminder).await.unwrap();
        let task_id = reminder.task_id.clone().unwrap();

        let mut mux = ServeMux::new();
        mux.handle(REMINDER_TASK_TYPE, Arc::new(p.worker.clone()));
        let server = QueueServer::new(
            p.queue.inner().clone(),
            mux,
            ServerConfig {
                poll_interval: std::time::Duration::from_millis(20),
                ..ServerConfig::default()
            },
        );

        let mut delivered = false;
        for _ in 0..150 {
            server.dispatch_due().await;
            if let Ok(info) = p.queue.inner().get_task_info("reminders", &task_id).await {
                if info.state == TaskState::Completed {
                    delivered = true;
                    break;
                }
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }

        assert!(delivered);
        assert_eq!(p.email.attempts(), 1);
        let stored = p.store.get_by_id(&reminder.id).await.unwrap();
        assert_eq!(stored.occurrence, 1);
    }
}
