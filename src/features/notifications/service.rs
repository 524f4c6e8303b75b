//! Request-driven sends: resolve the recipient, build the envelope, dispatch
//!
//! - **Version**: 1.0.0
//! - **Since**: 1.2.0

use super::{ContactBook, NotificationDispatcher, NotificationEnvelope, NotificationRequest, Recipient};
use anyhow::Result;
use log::{debug, warn};
use std::sync::Arc;

#[derive(Clone)]
pub struct NotificationService {
    dispatcher: Arc<NotificationDispatcher>,
    contacts: Arc<dyn ContactBook>,
}

impl NotificationService {
    pub fn new(dispatcher: Arc<NotificationDispatcher>, contacts: Arc<dyn ContactBook>) -> Self {
        Self {
            dispatcher,
            contacts,
        }
    }

    /// Resolve contact details and build the envelope for a request
    pub async fn envelope_for(&self, request: NotificationRequest) -> Result<NotificationEnvelope> {
        if request.message.trim().is_empty() {
            return Err(anyhow::anyhow!("Notification message cannot be empty"));
        }

        let recipient = match request.user_id {
            Some(ref user_id) => match self.contacts.lookup(user_id).await? {
                Some(recipient) => recipient,
                None => {
                    warn!("No contact details for user {user_id}, using notifier defaults");
                    Recipient::for_user(user_id.clone())
                }
            },
            None => Recipient::default(),
        };

        Ok(NotificationEnvelope::new(request.subject, request.message)
            .with_channels(request.channels)
            .with_recipient(recipient))
    }

    /// Send a notification request
    pub async fn send(&self, request: NotificationRequest) -> Result<()> {
        let envelope = self.envelope_for(request).await?;
        self.dispatcher.notify(&envelope).await?;
        debug!(
            "Notification sent to {}",
            envelope.recipient.user_id.as_deref().unwrap_or("default recipient")
        );
        Ok(())
    }
}
