//! Per-reminder async locks serializing scheduler and worker mutations
//!
//! - **Version**: 1.0.0
//! - **Since**: 1.2.0

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Default)]
pub struct ReminderLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl ReminderLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to one reminder
    pub async fn lock(&self, reminder_id: &str) -> OwnedMutexGuard<()> {
        let mutex = self
            .locks
            .entry(reminder_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        mutex.lock_owned().await
    }

    /// Drop the lock entry of a deleted reminder if nobody holds or waits on it
    pub fn forget(&self, reminder_id: &str) {
        self.locks
            .remove_if(reminder_id, |_, mutex| Arc::strong_count(mutex) == 1);
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
