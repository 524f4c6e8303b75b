//! Email delivery through an HTTP mail API (`POST` JSON with a bearer key)
//!
//! - **Version**: 1.0.0
//! - **Since**: 1.0.0

use super::config::EmailConfig;
use super::{Channel, NotificationEnvelope, Notifier};
use crate::core::{truncate_to, SUBJECT_LIMIT};
use async_trait::async_trait;
use serde::Serialize;

const DEFAULT_SUBJECT: &str = "Reminder";

#[derive(Debug, Serialize, PartialEq)]
pub struct EmailPayload {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub text: String,
}

#[derive(Clone)]
pub struct EmailNotifier {
    api_url: String,
    api_key: String,
    from: String,
    default_to: Option<String>,
    active: bool,
    client: reqwest::Client,
}

impl EmailNotifier {
    pub fn new(config: &EmailConfig, client: reqwest::Client) -> Self {
        Self {
            api_url: config.api_url.clone(),
            api_key: config.api_key.clone(),
            from: config.from.clone(),
            default_to: config.default_to.clone(),
            active: config.enabled,
            client,
        }
    }

    /// Build the request body, resolving the destination address
    pub fn payload(&self, envelope: &NotificationEnvelope) -> anyhow::Result<EmailPayload> {
        let to = envelope
            .recipient
            .email
            .clone()
            .filter(|e| !e.trim().is_empty())
            .or_else(|| self.default_to.clone())
            .ok_or_else(|| anyhow::anyhow!("no email address for recipient"))?;

        let subject = if envelope.subject.trim().is_empty() {
            DEFAULT_SUBJECT.to_string()
        } else {
            truncate_to(envelope.subject.trim(), SUBJECT_LIMIT)
        };

        Ok(EmailPayload {
            from: self.from.clone(),
            to,
            subject,
            text: envelope.message.clone(),
        })
    }
}

#[async_trait]
impl Notifier for EmailNotifier {
    fn channel(&self) -> Channel {
        Channel::Email
    }

    fn is_active(&self) -> bool {
        self.active
    }

    async fn send(&self, envelope: &NotificationEnvelope) -> anyhow::Result<()> {
        if self.api_key.trim().is_empty() {
            anyhow::bail!("email api key is empty");
        }
        let payload = self.payload(envelope)?;

        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("email send failed ({status}): {body}");
        }
        Ok(())
    }
}
