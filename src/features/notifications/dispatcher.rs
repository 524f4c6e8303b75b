//! Fail-fast fan-out of one envelope across its channels
//!
//! - **Version**: 1.1.0
//! - **Since**: 1.0.0
//!
//! ## Changelog
//! - 1.1.0: Default channels for envelopes that name none
//! - 1.0.0: Initial dispatcher

use super::{Channel, NotificationEnvelope, Notifier};
use crate::core::NotifyError;
use log::{debug, warn};
use std::sync::Arc;

/// Routes envelopes to the configured notifiers
pub struct NotificationDispatcher {
    notifiers: Vec<Arc<dyn Notifier>>,
    default_channels: Vec<Channel>,
}

impl NotificationDispatcher {
    pub fn new(notifiers: Vec<Arc<dyn Notifier>>, default_channels: Vec<Channel>) -> Self {
        Self {
            notifiers,
            default_channels,
        }
    }

    /// Channels that currently have an active notifier
    pub fn active_channels(&self) -> Vec<Channel> {
        self.notifiers
            .iter()
            .filter(|n| n.is_active())
            .map(|n| n.channel())
            .collect()
    }

    /// First active notifier for `channel`
    fn find_active(&self, channel: Channel) -> Option<&Arc<dyn Notifier>> {
        self.notifiers
            .iter()
            .find(|n| n.channel() == channel && n.is_active())
    }

    /// Deliver on every requested channel, in order
    ///
    /// Stops at the first failing channel; later channels are not attempted.
    /// Unknown tags, channels without a notifier, and inactive notifiers are
    /// skipped.
    pub async fn notify(&self, envelope: &NotificationEnvelope) -> Result<(), NotifyError> {
        let requested: Vec<String> = if envelope.channels.is_empty() {
            self.default_channels.iter().map(|c| c.to_string()).collect()
        } else {
            envelope.channels.clone()
        };

        let mut seen: Vec<Channel> = Vec::with_capacity(requested.len());
        for tag in &requested {
            let channel = match tag.parse::<Channel>() {
                Ok(channel) => channel,
                Err(_) => {
                    warn!("Skipping unknown notification channel '{tag}'");
                    continue;
                }
            };
            if seen.contains(&channel) {
                continue;
            }
            seen.push(channel);

            let Some(notifier) = self.find_active(channel) else {
                if self.notifiers.iter().any(|n| n.channel() == channel) {
                    debug!("Notifier for {channel} is inactive, skipping");
                } else {
                    warn!("No notifier configured for channel {channel}, skipping");
                }
                continue;
            };

            notifier
                .send(envelope)
                .await
                .map_err(|source| NotifyError::Delivery {
                    channel: channel.to_string(),
                    source,
                })?;
            debug!("Delivered '{}' via {channel}", envelope.subject);
        }
        Ok(())
    }
}
