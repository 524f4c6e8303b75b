//! SMS delivery through a Twilio-style REST API
//!
//! - **Version**: 1.0.0
//! - **Since**: 1.1.0

use super::config::SmsConfig;
use super::{Channel, NotificationEnvelope, Notifier};
use crate::core::{truncate_to, with_subject, SMS_LIMIT};
use async_trait::async_trait;

#[derive(Clone)]
pub struct SmsNotifier {
    api_base: String,
    account_sid: String,
    auth_token: String,
    from_number: String,
    default_to: Option<String>,
    active: bool,
    client: reqwest::Client,
}

impl SmsNotifier {
    pub fn new(config: &SmsConfig, client: reqwest::Client) -> Self {
        Self {
            api_base: config.api_base.trim_end_matches('/').to_string(),
            account_sid: config.account_sid.clone(),
            auth_token: config.auth_token.clone(),
            from_number: config.from_number.clone(),
            default_to: config.default_to.clone(),
            active: config.enabled,
            client,
        }
    }

    fn messages_url(&self) -> String {
        format!(
            "{}/Accounts/{}/Messages.json",
            self.api_base, self.account_sid
        )
    }

    /// Form fields for the message resource
    pub fn form(&self, envelope: &NotificationEnvelope) -> anyhow::Result<Vec<(&'static str, String)>> {
        let to = envelope
            .recipient
            .phone
            .clone()
            .filter(|p| !p.trim().is_empty())
            .or_else(|| self.default_to.clone())
            .ok_or_else(|| anyhow::anyhow!("no phone number for recipient"))?;

        let body = truncate_to(&with_subject(&envelope.subject, &envelope.message), SMS_LIMIT);
        Ok(vec![
            ("To", to),
            ("From", self.from_number.clone()),
            ("Body", body),
        ])
    }
}

#[async_trait]
impl Notifier for SmsNotifier {
    fn channel(&self) -> Channel {
        Channel::Sms
    }

    fn is_active(&self) -> bool {
        self.active
    }

    async fn send(&self, envelope: &NotificationEnvelope) -> anyhow::Result<()> {
        if self.account_sid.trim().is_empty() || self.auth_token.trim().is_empty() {
            anyhow::bail!("sms credentials are empty");
        }
        let form = self.form(envelope)?;

        let response = self
            .client
            .post(self.messages_url())
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&form)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("sms send failed ({status}): {body}");
        }
        Ok(())
    }
}
