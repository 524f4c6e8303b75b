//! Shared fixtures for unit tests

use crate::core::QueueError;
use crate::features::notifications::{
    Channel, ContactBook, NotificationEnvelope, Notifier, Recipient,
};
use crate::features::queue::{InMemoryTaskQueue, NewTask, TaskInfo, TaskOptions, TaskQueue};
use crate::features::reminders::{Recurrence, Reminder};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A reminder with a subject, one user and the email channel
pub fn reminder_at(recurrence: Recurrence, next: DateTime<Utc>) -> Reminder {
    Reminder::new("req-test", "take a break", recurrence, next)
        .with_user("user-1")
        .with_subject("Break")
        .with_channels(["email"])
}

/// Notifier that records every envelope and can be told to fail
pub struct RecordingNotifier {
    channel: Channel,
    active: bool,
    failure: Option<String>,
    delay: Option<Duration>,
    sent: Mutex<Vec<NotificationEnvelope>>,
}

impl RecordingNotifier {
    pub fn new(channel: Channel) -> Arc<Self> {
        Arc::new(Self {
            channel,
            active: true,
            failure: None,
            delay: None,
            sent: Mutex::new(Vec::new()),
        })
    }

    pub fn failing(channel: Channel, message: &str) -> Arc<Self> {
        Arc::new(Self {
            channel,
            active: true,
            failure: Some(message.to_string()),
            delay: None,
            sent: Mutex::new(Vec::new()),
        })
    }

    pub fn inactive(channel: Channel) -> Arc<Self> {
        Arc::new(Self {
            channel,
            active: false,
            failure: None,
            delay: None,
            sent: Mutex::new(Vec::new()),
        })
    }

    /// Succeeds, but only after `delay`
    pub fn stalled(channel: Channel, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            channel,
            active: true,
            failure: None,
            delay: Some(delay),
            sent: Mutex::new(Vec::new()),
        })
    }

    /// Every envelope handed to `send`, failed attempts included
    pub fn sent(&self) -> Vec<NotificationEnvelope> {
        self.sent.lock().unwrap().clone()
    }

    pub fn attempts(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    fn channel(&self) -> Channel {
        self.channel
    }

    fn is_active(&self) -> bool {
        self.active
    }

    async fn send(&self, envelope: &NotificationEnvelope) -> anyhow::Result<()> {
        self.sent.lock().unwrap().push(envelope.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match self.failure {
            Some(ref message) => Err(anyhow::anyhow!("{message}")),
            None => Ok(()),
        }
    }
}

#[derive(Default)]
pub struct MemoryContactBook {
    contacts: Mutex<HashMap<String, Recipient>>,
}

impl MemoryContactBook {
    pub fn insert(&self, recipient: Recipient) {
        let key = recipient.user_id.clone().unwrap_or_default();
        self.contacts.lock().unwrap().insert(key, recipient);
    }
}

#[async_trait]
impl ContactBook for MemoryContactBook {
    async fn lookup(&self, user_id: &str) -> anyhow::Result<Option<Recipient>> {
        Ok(self.contacts.lock().unwrap().get(user_id).cloned())
    }
}

/// Queue wrapper that counts calls and injects failures or stalls
pub struct FlakyQueue {
    inner: Arc<InMemoryTaskQueue>,
    calls: AtomicUsize,
    failures: Mutex<HashMap<&'static str, String>>,
    stall: Mutex<Option<Duration>>,
}

impl FlakyQueue {
    pub fn new(inner: InMemoryTaskQueue) -> Self {
        Self {
            inner: Arc::new(inner),
            calls: AtomicUsize::new(0),
            failures: Mutex::new(HashMap::new()),
            stall: Mutex::new(None),
        }
    }

    pub fn inner(&self) -> &Arc<InMemoryTaskQueue> {
        &self.inner
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Make every call of `op` fail with a backend error
    pub fn fail(&self, op: &'static str, message: &str) {
        self.failures
            .lock()
            .unwrap()
            .insert(op, message.to_string());
    }

    /// Delay every call by `delay`
    pub fn stall(&self, delay: Duration) {
        *self.stall.lock().unwrap() = Some(delay);
    }

    async fn before(&self, op: &'static str) -> Result<(), QueueError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let stall = *self.stall.lock().unwrap();
        if let Some(delay) = stall {
            tokio::time::sleep(delay).await;
        }
        let failure = self.failures.lock().unwrap().get(op).cloned();
        match failure {
            Some(message) => Err(QueueError::Backend(message)),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl TaskQueue for FlakyQueue {
    async fn enqueue(&self, task: NewTask, options: TaskOptions) -> Result<TaskInfo, QueueError> {
        self.before("enqueue").await?;
        self.inner.enqueue(task, options).await
    }

    async fn get_task_info(&self, queue: &str, task_id: &str) -> Result<TaskInfo, QueueError> {
        self.before("get_task_info").await?;
        self.inner.get_task_info(queue, task_id).await
    }

    async fn cancel_processing(&self, task_id: &str) -> Result<(), QueueError> {
        self.before("cancel_processing").await?;
        self.inner.cancel_processing(task_id).await
    }

    async fn delete_task(&self, queue: &str, task_id: &str) -> Result<(), QueueError> {
        self.before("delete_task").await?;
        self.inner.delete_task(queue, task_id).await
    }
}
