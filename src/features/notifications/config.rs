//! # Notifier Configuration
//!
//! YAML description of the email, SMS and Telegram backends with validation.
//!
//! - **Version**: 1.1.0
//! - **Since**: 1.0.0
//!
//! ## Changelog
//! - 1.1.0: Telegram section and shared HTTP timeout
//! - 1.0.0: Initial schema

use super::{EmailNotifier, Notifier, SmsNotifier, TelegramNotifier};
use anyhow::Result;
use log::info;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

const EMAIL_PATTERN: &str = r"^[^@\s]+@[^@\s]+\.[^@\s]+$";
const E164_PATTERN: &str = r"^\+[1-9]\d{6,14}$";

fn default_true() -> bool {
    true
}

fn default_timeout_secs() -> u64 {
    15
}

fn default_twilio_base() -> String {
    "https://api.twilio.com/2010-04-01".to_string()
}

fn default_telegram_base() -> String {
    "https://api.telegram.org".to_string()
}

/// Root notifier configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NotifiersConfig {
    /// Timeout applied to every outbound HTTP request
    #[serde(default = "default_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default)]
    pub email: Option<EmailConfig>,

    #[serde(default)]
    pub sms: Option<SmsConfig>,

    #[serde(default)]
    pub telegram: Option<TelegramConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EmailConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub api_url: String,
    pub api_key: String,
    /// Sender address
    pub from: String,
    /// Used when the recipient has no address on file
    #[serde(default)]
    pub default_to: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SmsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_twilio_base")]
    pub api_base: String,
    pub account_sid: String,
    pub auth_token: String,
    /// Sender number in E.164 form
    pub from_number: String,
    #[serde(default)]
    pub default_to: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TelegramConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_telegram_base")]
    pub api_base: String,
    pub bot_token: String,
    #[serde(default)]
    pub default_chat_id: Option<String>,
}

impl NotifiersConfig {
    /// Load and validate notifier configuration from a YAML file
    pub fn load(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Like [`load`](Self::load), but a missing file yields an empty configuration
    pub fn load_or_empty(path: &str) -> Result<Self> {
        if !Path::new(path).exists() {
            info!("No notifier configuration at {path}, running without notifiers");
            return Ok(Self::empty());
        }
        Self::load(path)
    }

    pub fn from_yaml(contents: &str) -> Result<Self> {
        let config: NotifiersConfig = serde_yaml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn empty() -> Self {
        Self {
            request_timeout_secs: default_timeout_secs(),
            email: None,
            sms: None,
            telegram: None,
        }
    }

    /// Check addresses, numbers and credentials of the enabled backends
    pub fn validate(&self) -> Result<()> {
        let email_re = regex::Regex::new(EMAIL_PATTERN)?;
        let phone_re = regex::Regex::new(E164_PATTERN)?;

        if self.request_timeout_secs == 0 {
            return Err(anyhow::anyhow!("request_timeout_secs must be at least 1"));
        }

        if let Some(ref email) = self.email {
            if email.enabled {
                if email.api_url.trim().is_empty() || email.api_key.trim().is_empty() {
                    return Err(anyhow::anyhow!("Email notifier requires api_url and api_key"));
                }
                if !email_re.is_match(&email.from) {
                    return Err(anyhow::anyhow!("Invalid email sender address: {}", email.from));
                }
            }
            if let Some(ref to) = email.default_to {
                if !email_re.is_match(to) {
                    return Err(anyhow::anyhow!("Invalid default email address: {}", to));
                }
            }
        }

        if let Some(ref sms) = self.sms {
            if sms.enabled {
                if sms.account_sid.trim().is_empty() || sms.auth_token.trim().is_empty() {
                    return Err(anyhow::anyhow!(
                        "SMS notifier requires account_sid and auth_token"
                    ));
                }
                if !phone_re.is_match(&sms.from_number) {
                    return Err(anyhow::anyhow!(
                        "SMS sender must be an E.164 number: {}",
                        sms.from_number
                    ));
                }
            }
            if let Some(ref to) = sms.default_to {
                if !phone_re.is_match(to) {
                    return Err(anyhow::anyhow!("Default SMS number must be E.164: {}", to));
                }
            }
        }

        if let Some(ref telegram) = self.telegram {
            if telegram.enabled && telegram.bot_token.trim().is_empty() {
                return Err(anyhow::anyhow!("Telegram notifier requires bot_token"));
            }
        }

        Ok(())
    }

    /// Build notifiers sharing one HTTP client
    ///
    /// Disabled sections are still built; they report themselves inactive.
    pub fn build(&self) -> Result<Vec<Arc<dyn Notifier>>> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(self.request_timeout_secs))
            .build()?;

        let mut notifiers: Vec<Arc<dyn Notifier>> = Vec::new();
        if let Some(ref email) = self.email {
            notifiers.push(Arc::new(EmailNotifier::new(email, client.clone())));
        }
        if let Some(ref sms) = self.sms {
            notifiers.push(Arc::new(SmsNotifier::new(sms, client.clone())));
        }
        if let Some(ref telegram) = self.telegram {
            notifiers.push(Arc::new(TelegramNotifier::new(telegram, client.clone())));
        }
        Ok(notifiers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::notifications::Channel;

    const FULL: &str = r#"
request_timeout_secs: 5
email:
  api_url: https://mail.example.com/send
  api_key: key
  from: reminders@example.com
sms:
  account_sid: AC123
  auth_token: secret
  from_number: "+15550000000"
  default_to: "+15551234567"
telegram:
  enabled: false
  bot_token: ""
"#;

    #[test]
    fn test_parse_full_config() {
        let config = NotifiersConfig::from_yaml(FULL).unwrap();
        assert_eq!(config.request_timeout_secs, 5);
        assert!(config.email.as_ref().unwrap().enabled);
        assert_eq!(
            config.sms.as_ref().unwrap().api_base,
            "https://api.twilio.com/2010-04-01"
        );
        assert!(!config.telegram.as_ref().unwrap().enabled);
    }

    #[test]
    fn test_build_marks_disabled_inactive() {
        let notifiers = NotifiersConfig::from_yaml(FULL).unwrap().build().unwrap();
        assert_eq!(notifiers.len(), 3);
        let telegram = notifiers
            .iter()
            .find(|n| n.channel() == Channel::Telegram)
            .unwrap();
        assert!(!telegram.is_active());
        assert!(notifiers
            .iter()
            .filter(|n| n.channel() != Channel::Telegram)
            .all(|n| n.is_active()));
    }

    #[test]
    fn test_rejects_bad_sender_address() {
        let yaml = r#"
email:
  api_url: https://mail.example.com/send
  api_key: key
  from: not-an-address
"#;
        assert!(NotifiersConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_rejects_non_e164_number() {
        let yaml = r#"
sms:
  account_sid: AC123
  auth_token: secret
  from_number: "555-0000"
"#;
        let err = NotifiersConfig::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("E.164"));
    }

    #[test]
    fn test_enabled_telegram_requires_token() {
        let yaml = "telegram:\n  bot_token: \"\"\n";
        assert!(NotifiersConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_missing_file_is_empty() {
        let config = NotifiersConfig::load_or_empty("/nonexistent/notifiers.yaml").unwrap();
        assert!(config.build().unwrap().is_empty());
    }
}
