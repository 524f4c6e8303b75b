//! Telegram delivery through the Bot API `sendMessage` method
//!
//! - **Version**: 1.0.0
//! - **Since**: 1.3.0

use super::config::TelegramConfig;
use super::{Channel, NotificationEnvelope, Notifier};
use crate::core::{chunk_text, TELEGRAM_LIMIT};
use async_trait::async_trait;

#[derive(Clone)]
pub struct TelegramNotifier {
    api_base: String,
    bot_token: String,
    default_chat_id: Option<String>,
    active: bool,
    client: reqwest::Client,
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

impl TelegramNotifier {
    pub fn new(config: &TelegramConfig, client: reqwest::Client) -> Self {
        Self {
            api_base: config.api_base.trim_end_matches('/').to_string(),
            bot_token: config.bot_token.clone(),
            default_chat_id: config.default_chat_id.clone(),
            active: config.enabled,
            client,
        }
    }

    fn chat_id(&self, envelope: &NotificationEnvelope) -> anyhow::Result<String> {
        envelope
            .recipient
            .telegram_chat_id
            .clone()
            .filter(|c| !c.trim().is_empty())
            .or_else(|| self.default_chat_id.clone())
            .ok_or_else(|| anyhow::anyhow!("no telegram chat for recipient"))
    }

    /// HTML message text, split to fit the message size limit
    ///
    /// The subject is rendered bold on the first line.
    pub fn render(&self, envelope: &NotificationEnvelope) -> Vec<String> {
        let subject = envelope.subject.trim();
        let text = if subject.is_empty() {
            escape_html(&envelope.message)
        } else {
            format!("<b>{}</b>\n{}", escape_html(subject), escape_html(&envelope.message))
        };
        chunk_text(&text, TELEGRAM_LIMIT)
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    fn channel(&self) -> Channel {
        Channel::Telegram
    }

    fn is_active(&self) -> bool {
        self.active
    }

    async fn send(&self, envelope: &NotificationEnvelope) -> anyhow::Result<()> {
        if self.bot_token.trim().is_empty() {
            anyhow::bail!("telegram bot token is empty");
        }
        let chat_id = self.chat_id(envelope)?;
        let url = format!("{}/bot{}/sendMessage", self.api_base, self.bot_token);

        for chunk in self.render(envelope) {
            let body = serde_json::json!({
                "chat_id": chat_id,
                "text": chunk,
                "parse_mode": "HTML",
            });
            let response = self.client.post(&url).json(&body).send().await?;
            if !response.status().is_success() {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                anyhow::bail!("telegram send failed ({status}): {body}");
            }
        }
        Ok(())
    }
}
