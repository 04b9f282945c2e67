/// Outbound run notifications
///
/// Delivery is best-effort: `Notifications::broadcast` logs a failed channel
/// and moves on, it never fails the backup.

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use reqwest::Client;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::core::config::{Configuration, Secrets, TelegramSecrets};
use crate::error::{BackupError, BackupResult};
use crate::utils::{mask_sensitive, truncate_string, TELEGRAM_API_URL, TELEGRAM_TIMEOUT};

/// Telegram rejects longer message texts
const TELEGRAM_MAX_MESSAGE_CHARS: usize = 4096;

#[cfg_attr(test, automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> String;

    async fn send(&self, message: &str) -> BackupResult<()>;
}

pub struct TelegramNotifier {
    client: Client,
    api_url: String,
    bot_token: String,
    chat_ids: Vec<String>,
}

impl TelegramNotifier {
    pub fn new(secrets: &TelegramSecrets) -> BackupResult<Self> {
        Self::with_api_url(TELEGRAM_API_URL, secrets)
    }

    pub fn with_api_url(api_url: impl Into<String>, secrets: &TelegramSecrets) -> BackupResult<Self> {
        let client = Client::builder()
            .timeout(TELEGRAM_TIMEOUT)
            .build()
            .map_err(|e| BackupError::Notification(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            bot_token: secrets.bot_token.clone(),
            chat_ids: secrets.chatids.clone(),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/bot{}/sendMessage", self.api_url, self.bot_token)
    }

    async fn send_to(&self, chat_id: &str, text: &str) -> BackupResult<()> {
        let payload = json!({
            "chat_id": chat_id,
            "text": text,
        });

        let response = self
            .client
            .post(self.endpoint())
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                // reqwest errors include the URL, which carries the bot token
                BackupError::Notification(format!(
                    "Request to chat {} failed: {}",
                    chat_id,
                    e.without_url()
                ))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackupError::Notification(format!(
                "Telegram answered HTTP {} for chat {}: {}",
                status,
                chat_id,
                truncate_string(body.trim(), 200)
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    fn name(&self) -> String {
        "telegram".to_string()
    }

    async fn send(&self, message: &str) -> BackupResult<()> {
        debug!(
            bot = %mask_sensitive(&self.bot_token, 4),
            chats = self.chat_ids.len(),
            "Sending telegram message"
        );
        let text = truncate_string(message, TELEGRAM_MAX_MESSAGE_CHARS);

        // Every chat gets its attempt; the first failure is reported
        let mut first_error = None;
        for chat_id in &self.chat_ids {
            if let Err(e) = self.send_to(chat_id, &text).await {
                warn!("{}", e);
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

/// All configured channels of one run
#[derive(Default)]
pub struct Notifications {
    channels: Vec<Box<dyn Notifier>>,
}

impl Notifications {
    pub fn new(channels: Vec<Box<dyn Notifier>>) -> Self {
        Self { channels }
    }

    pub fn from_config(config: &Configuration, secrets: &Secrets) -> BackupResult<Self> {
        let mut channels: Vec<Box<dyn Notifier>> = Vec::new();

        if config.telegram {
            let telegram = secrets.telegram.as_ref().ok_or_else(|| {
                BackupError::config("telegram is enabled but no telegram secrets are loaded")
            })?;
            channels.push(Box::new(TelegramNotifier::new(telegram)?));
        }

        Ok(Self::new(channels))
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Send `message` to every channel; returns how many accepted it
    pub async fn broadcast(&self, message: &str) -> usize {
        let mut delivered = 0;
        for channel in &self.channels {
            match channel.send(message).await {
                Ok(()) => {
                    info!("Notification sent via {}", channel.name());
                    delivered += 1;
                }
                Err(e) => warn!("Notification via {} failed: {}", channel.name(), e),
            }
        }
        delivered
    }
}

pub fn success_message(config: &Configuration) -> String {
    format!("borg-backup of {} finished successfully.", config.foldername)
}

pub fn failure_message(config: &Configuration, report: &str) -> String {
    format!(
        "ERROR: borg-backup for {} failed with reason:\n{}",
        config.foldername, report
    )
}
