//! Telegram Bot API sender.
//!
//! Failure classification uses the documented `error_code` of the Bot API
//! response: 403 means the bot can no longer write to the chat (blocked,
//! user deactivated, kicked). Everything else is retried on a later run.

use async_trait::async_trait;
use kouran_core::config::TelegramConfig;
use kouran_core::{DeliveryOutcome, MessageSender};
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize)]
pub struct TelegramApiResponse {
    pub ok: bool,
    pub description: Option<String>,
    pub error_code: Option<u16>,
    pub parameters: Option<ResponseParameters>,
}

#[derive(Debug, Deserialize)]
pub struct ResponseParameters {
    pub retry_after: Option<u64>,
}

pub struct TelegramSender {
    client: reqwest::Client,
    api_base: String,
    bot_token: String,
    timeout: Duration,
}

impl TelegramSender {
    pub fn new(config: &TelegramConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base: config.api_base.trim_end_matches('/').to_string(),
            bot_token: config.bot_token.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    fn api_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.bot_token, method)
    }
}

/// Map a failed Bot API call to a delivery outcome.
pub fn classify_failure(error_code: u16, description: &str) -> DeliveryOutcome {
    let reason = format!("{error_code}: {description}");
    match error_code {
        403 => DeliveryOutcome::Permanent(reason),
        _ => DeliveryOutcome::Transient(reason),
    }
}

#[async_trait]
impl MessageSender for TelegramSender {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn send(&self, chat_id: i64, text: &str) -> DeliveryOutcome {
        let body = serde_json::json!({
            "chat_id": chat_id,
            "text": text,
        });

        let resp = match self
            .client
            .post(self.api_url("sendMessage"))
            .json(&body)
            .timeout(self.timeout)
            .send()
            .await
        {
            Ok(resp) => resp,
            // No status: connection refused, DNS, timeout.
            Err(e) => return DeliveryOutcome::Transient(format!("sendMessage failed: {}", e.without_url())),
        };

        let status = resp.status();
        let parsed: Option<TelegramApiResponse> = resp.json().await.ok();

        match parsed {
            Some(r) if r.ok => DeliveryOutcome::Delivered,
            Some(r) => {
                if let Some(wait) = r.parameters.as_ref().and_then(|p| p.retry_after) {
                    tracing::warn!("⏳ Telegram throttled delivery to {chat_id}, retry after {wait}s");
                }
                classify_failure(
                    r.error_code.unwrap_or(status.as_u16()),
                    r.description.as_deref().unwrap_or("no description"),
                )
            }
            None if status.is_success() => {
                DeliveryOutcome::Transient(format!("unreadable sendMessage response ({status})"))
            }
            None => classify_failure(status.as_u16(), "unreadable error response"),
        }
    }
}
