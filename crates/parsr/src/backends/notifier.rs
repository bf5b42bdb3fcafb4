use async_trait::async_trait;
use serde::Deserialize;
use tracing::trace;

use crate::backends::http::{WebhookNotifier, WebhookNotifierConfig};
use crate::backends::in_mem::InMemoryNotifier;
use crate::common::NotificationMessage;
use crate::errors::NotifyError;

/// 🔔 Delivers one message to one account.
///
/// `Ok(true)` = delivered, `Ok(false)` = nobody to deliver to (no device, disabled),
/// `Err` = it went wrong. The fanout treats the last two the same way: log, move on.
#[async_trait]
pub trait Notifier: std::fmt::Debug + Send + Sync {
    async fn notify(&self, account_id: u64, message: &NotificationMessage)
    -> Result<bool, NotifyError>;
}

#[derive(Debug, Deserialize, Clone, Default)]
pub enum NotifierConfig {
    #[default]
    Disabled,
    InMemory,
    Webhook(WebhookNotifierConfig),
}

#[derive(Debug)]
pub enum NotifierBackend {
    Disabled,
    InMemory(InMemoryNotifier),
    Webhook(WebhookNotifier),
}

impl NotifierBackend {
    pub fn from_config(config: &NotifierConfig) -> anyhow::Result<Self> {
        Ok(match config {
            NotifierConfig::Disabled => NotifierBackend::Disabled,
            NotifierConfig::InMemory => NotifierBackend::InMemory(InMemoryNotifier::default()),
            NotifierConfig::Webhook(c) => NotifierBackend::Webhook(WebhookNotifier::new(c.clone())?),
        })
    }
}

#[async_trait]
impl Notifier for NotifierBackend {
    async fn notify(
        &self,
        account_id: u64,
        message: &NotificationMessage,
    ) -> Result<bool, NotifyError> {
        match self {
            NotifierBackend::Disabled => {
                trace!(account_id, "🔕 notifications disabled, not telling anyone");
                Ok(false)
            }
            NotifierBackend::InMemory(n) => n.notify(account_id, message).await,
            NotifierBackend::Webhook(n) => n.notify(account_id, message).await,
        }
    }
}
