//! Reminder persistence contract and an in-memory implementation
//!
//! - **Version**: 1.1.0
//! - **Since**: 1.0.0
//!
//! ## Changelog
//! - 1.1.0: Optimistic version check on update
//! - 1.0.0: Initial store

use super::model::Reminder;
use crate::core::StoreError;
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;

/// CRUD for reminders
///
/// `update` is optimistic: the caller's `version` must match the stored one,
/// and the stored record comes back with the version incremented.
#[async_trait]
pub trait ReminderStore: Send + Sync {
    async fn create(&self, reminder: &Reminder) -> Result<Reminder, StoreError>;

    async fn get_by_id(&self, id: &str) -> Result<Reminder, StoreError>;

    async fn update(&self, reminder: &Reminder) -> Result<Reminder, StoreError>;

    async fn delete(&self, id: &str) -> Result<(), StoreError>;

    /// Reminders that currently reference a queue task
    async fn list_scheduled(&self) -> Result<Vec<Reminder>, StoreError>;
}

/// Process-local store, used for tests and ephemeral runs
#[derive(Default)]
pub struct MemoryReminderStore {
    reminders: DashMap<String, Reminder>,
}

impl MemoryReminderStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.reminders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reminders.is_empty()
    }
}

#[async_trait]
impl ReminderStore for MemoryReminderStore {
    async fn create(&self, reminder: &Reminder) -> Result<Reminder, StoreError> {
        if self.reminders.contains_key(&reminder.id) {
            return Err(StoreError::Backend(format!(
                "reminder {} already exists",
                reminder.id
            )));
        }
        self.reminders.insert(reminder.id.clone(), reminder.clone());
        Ok(reminder.clone())
    }

    async fn get_by_id(&self, id: &str) -> Result<Reminder, StoreError> {
        self.reminders
            .get(id)
            .map(|r| r.clone())
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn update(&self, reminder: &Reminder) -> Result<Reminder, StoreError> {
        let mut stored = self
            .reminders
            .get_mut(&reminder.id)
            .ok_or_else(|| StoreError::NotFound(reminder.id.clone()))?;

        if stored.version != reminder.version {
            return Err(StoreError::Conflict {
                id: reminder.id.clone(),
                expected: reminder.version,
                found: stored.version,
            });
        }

        let mut next = reminder.clone();
        next.version = reminder.version + 1;
        next.updated_at = Utc::now();
        *stored = next.clone();
        Ok(next)
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        self.reminders
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn list_scheduled(&self) -> Result<Vec<Reminder>, StoreError> {
        let mut scheduled: Vec<Reminder> = self
            .reminders
            .iter()
            .filter(|r| r.task_id.is_some())
            .map(|r| r.clone())
            .collect();
        scheduled.sort_by_key(|r| r.next_trigger_time);
        Ok(scheduled)
    }
}
