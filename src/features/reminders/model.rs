//! # Reminder Model
//!
//! The persisted reminder record, its recurrence unit, and explicit edits.
//!
//! - **Version**: 1.2.0
//! - **Since**: 1.0.0
//!
//! ## Changelog
//! - 1.2.0: Optimistic `version` counter
//! - 1.1.0: `every` multiplier and quarterly recurrence
//! - 1.0.0: Initial model

use crate::features::notifications::NotificationRequest;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Interval unit of a recurring reminder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Recurrence {
    Once,
    Minutes,
    Hour,
    Daily,
    Weekly,
    Monthly,
    /// Four calendar months per step
    Quarterly,
}

impl Recurrence {
    pub fn is_recurring(&self) -> bool {
        !matches!(self, Recurrence::Once)
    }
}

impl std::fmt::Display for Recurrence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Recurrence::Once => "once",
            Recurrence::Minutes => "minutes",
            Recurrence::Hour => "hour",
            Recurrence::Daily => "daily",
            Recurrence::Weekly => "weekly",
            Recurrence::Monthly => "monthly",
            Recurrence::Quarterly => "quarterly",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for Recurrence {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "once" => Ok(Recurrence::Once),
            "minutes" | "minute" => Ok(Recurrence::Minutes),
            "hour" | "hourly" | "hours" => Ok(Recurrence::Hour),
            "daily" | "day" => Ok(Recurrence::Daily),
            "weekly" | "week" => Ok(Recurrence::Weekly),
            "monthly" | "month" => Ok(Recurrence::Monthly),
            "quarterly" | "quarter" => Ok(Recurrence::Quarterly),
            _ => Err(anyhow::anyhow!("Invalid recurrence: {}", s)),
        }
    }
}

fn default_every() -> u32 {
    1
}

/// A scheduled reminder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reminder {
    pub id: String,
    pub request_id: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub subject: Option<String>,
    pub message: String,
    /// Channel tags; empty means the configured defaults
    #[serde(default)]
    pub channels: Vec<String>,
    pub recurrence: Recurrence,
    #[serde(default = "default_every")]
    pub every: u32,
    /// Fires processed so far
    #[serde(default)]
    pub occurrence: u32,
    #[serde(default)]
    pub triggered_time: Option<DateTime<Utc>>,
    pub next_trigger_time: DateTime<Utc>,
    /// Hard expiry; no fire is scheduled past it
    #[serde(default)]
    pub upto: Option<DateTime<Utc>>,
    /// Outstanding queue task, if any
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Reminder {
    pub fn new(
        request_id: impl Into<String>,
        message: impl Into<String>,
        recurrence: Recurrence,
        next_trigger_time: DateTime<Utc>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            request_id: request_id.into(),
            user_id: None,
            subject: None,
            message: message.into(),
            channels: Vec::new(),
            recurrence,
            every: 1,
            occurrence: 0,
            triggered_time: None,
            next_trigger_time,
            upto: None,
            task_id: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn with_channels<I, S>(mut self, channels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.channels = channels.into_iter().map(Into::into).collect();
        self
    }

    pub fn every(mut self, every: u32) -> Self {
        self.every = every.max(1);
        self
    }

    pub fn until(mut self, upto: DateTime<Utc>) -> Self {
        self.upto = Some(upto);
        self
    }

    /// True once the `upto` cutoff lies strictly before `now`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.upto.is_some_and(|upto| upto < now)
    }

    /// Queue unique key for the currently scheduled occurrence
    pub fn unique_key(&self) -> String {
        format!("{}:{}", self.id, self.next_trigger_time.timestamp())
    }

    /// Notification request for one fire of this reminder
    pub fn notification_request(&self) -> NotificationRequest {
        NotificationRequest {
            user_id: self.user_id.clone(),
            subject: self.subject.clone().unwrap_or_default(),
            message: self.message.clone(),
            channels: self.channels.clone(),
        }
    }

    /// Apply a partial edit; returns true when the schedule changed
    pub fn apply_edit(&mut self, edit: ReminderEdit) -> bool {
        let mut rescheduled = false;

        if let Some(subject) = edit.subject {
            self.subject = subject;
        }
        if let Some(message) = edit.message {
            self.message = message;
        }
        if let Some(channels) = edit.channels {
            self.channels = channels;
        }
        if let Some(user_id) = edit.user_id {
            self.user_id = user_id;
        }
        if let Some(recurrence) = edit.recurrence {
            rescheduled |= recurrence != self.recurrence;
            self.recurrence = recurrence;
        }
        if let Some(every) = edit.every {
            let every = every.max(1);
            rescheduled |= every != self.every;
            self.every = every;
        }
        if let Some(next) = edit.next_trigger_time {
            rescheduled |= next != self.next_trigger_time;
            self.next_trigger_time = next;
        }
        if let Some(upto) = edit.upto {
            rescheduled |= upto != self.upto;
            self.upto = upto;
        }

        self.updated_at = Utc::now();
        rescheduled
    }
}

/// Partial update of a reminder
///
/// `None` leaves a field unchanged; for clearable fields `Some(None)` clears it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReminderEdit {
    #[serde(default)]
    pub subject: Option<Option<String>>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub channels: Option<Vec<String>>,
    #[serde(default)]
    pub user_id: Option<Option<String>>,
    #[serde(default)]
    pub recurrence: Option<Recurrence>,
    #[serde(default)]
    pub every: Option<u32>,
    #[serde(default)]
    pub next_trigger_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub upto: Option<Option<DateTime<Utc>>>,
}
