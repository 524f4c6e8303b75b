//! # Notifications Feature
//!
//! Multi-channel delivery of reminder and ad-hoc notifications. A
//! [`NotificationDispatcher`] walks the requested channels and hands the
//! envelope to the matching [`Notifier`].
//!
//! - **Version**: 1.3.0
//! - **Since**: 1.0.0
//! - **Toggleable**: true
//!
//! ## Changelog
//! - 1.3.0: Telegram notifier and YAML notifier configuration
//! - 1.2.0: Contact book lookup for request-driven sends
//! - 1.1.0: SMS notifier
//! - 1.0.0: Email notifier and fail-fast dispatcher

pub mod config;
pub mod dispatcher;
pub mod email;
pub mod service;
pub mod sms;
pub mod telegram;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use config::NotifiersConfig;
pub use dispatcher::NotificationDispatcher;
pub use email::EmailNotifier;
pub use service::NotificationService;
pub use sms::SmsNotifier;
pub use telegram::TelegramNotifier;

/// Delivery channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Email,
    Sms,
    Telegram,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Email => "email",
            Channel::Sms => "sms",
            Channel::Telegram => "telegram",
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Channel {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "email" => Ok(Channel::Email),
            "sms" => Ok(Channel::Sms),
            "telegram" => Ok(Channel::Telegram),
            _ => Err(anyhow::anyhow!("Invalid notification channel: {}", s)),
        }
    }
}

/// Contact details of the person being notified
///
/// Empty fields make each notifier fall back to its configured default
/// destination.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Recipient {
    pub user_id: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub telegram_chat_id: Option<String>,
}

impl Recipient {
    /// A recipient known only by user ID
    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            ..Self::default()
        }
    }
}

/// One notification ready for delivery
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NotificationEnvelope {
    pub subject: String,
    pub message: String,
    /// Channel tags in delivery order; empty means the dispatcher defaults
    pub channels: Vec<String>,
    pub recipient: Recipient,
}

impl NotificationEnvelope {
    pub fn new(subject: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            message: message.into(),
            ..Self::default()
        }
    }

    pub fn with_channels<I, S>(mut self, channels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.channels = channels.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_recipient(mut self, recipient: Recipient) -> Self {
        self.recipient = recipient;
        self
    }
}

/// Request accepted by [`NotificationService::send`]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotificationRequest {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub subject: String,
    pub message: String,
    #[serde(default)]
    pub channels: Vec<String>,
}

/// A single delivery channel backend
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Channel this notifier delivers on
    fn channel(&self) -> Channel;

    /// Inactive notifiers are skipped by the dispatcher
    fn is_active(&self) -> bool;

    /// Deliver the envelope
    async fn send(&self, envelope: &NotificationEnvelope) -> anyhow::Result<()>;
}

/// Resolves user IDs to contact details
#[async_trait]
pub trait ContactBook: Send + Sync {
    async fn lookup(&self, user_id: &str) -> anyhow::Result<Option<Recipient>>;
}
