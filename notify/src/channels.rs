//! Per-channel webhook senders.

use std::time::Duration;

use anyhow::{bail, Context};
use async_trait::async_trait;
use base64::{prelude::BASE64_STANDARD, Engine};
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde_json::json;
use sha2::Sha256;
use timelock_types::{Channel, NotificationConfig};

/// Budget for a single webhook POST.
const SEND_TIMEOUT: Duration = Duration::from_secs(30);

/// Delivery of one rendered message through one channel config.
#[async_trait]
pub trait ChannelSender: Send + Sync {
    async fn send(&self, config: &NotificationConfig, text: &str) -> anyhow::Result<()>;
}

/// Lark/Feishu webhook signature: HMAC-SHA256 with `"{timestamp}\n{secret}"`
/// as the key over an empty message, base64 encoded.
pub fn sign_webhook(timestamp: i64, secret: &str) -> String {
    let key = format!("{timestamp}\n{secret}");
    let mac = Hmac::<Sha256>::new_from_slice(key.as_bytes())
        .expect("hmac accepts keys of any length");
    BASE64_STANDARD.encode(mac.finalize().into_bytes())
}

/// Production sender: one HTTP client, channel-specific envelopes.
#[derive(Clone)]
pub struct WebhookSender {
    http: reqwest::Client,
}

impl WebhookSender {
    pub fn new() -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(SEND_TIMEOUT)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { http })
    }

    async fn post(&self, url: &str, body: serde_json::Value) -> anyhow::Result<()> {
        let response = self
            .http
            .post(url)
            .json(&body)
            .send()
            .await
            .context("webhook request failed")?;
        let status = response.status();
        if !status.is_success() {
            bail!("webhook returned {status}");
        }
        Ok(())
    }

    fn webhook_url<'a>(config: &'a NotificationConfig) -> anyhow::Result<&'a str> {
        config
            .webhook_url
            .as_deref()
            .filter(|url| !url.is_empty())
            .with_context(|| format!("{} config {} has no webhook url", config.channel, config.id))
    }
}

#[async_trait]
impl ChannelSender for WebhookSender {
    async fn send(&self, config: &NotificationConfig, text: &str) -> anyhow::Result<()> {
        match config.channel {
            Channel::Telegram => {
                let token = config
                    .bot_token
                    .as_deref()
                    .context("telegram config has no bot token")?;
                let chat_id = config
                    .chat_id
                    .as_deref()
                    .context("telegram config has no chat id")?;
                let url = format!("https://api.telegram.org/bot{token}/sendMessage");
                self.post(&url, json!({ "chat_id": chat_id, "text": text }))
                    .await
            },
            Channel::Discord => {
                self.post(Self::webhook_url(config)?, json!({ "content": text }))
                    .await
            },
            Channel::Slack => {
                self.post(Self::webhook_url(config)?, json!({ "text": text }))
                    .await
            },
            Channel::Lark | Channel::Feishu => {
                let mut envelope = json!({
                    "msg_type": "text",
                    "content": { "text": text },
                });
                if let Some(secret) = config.secret.as_deref().filter(|s| !s.is_empty()) {
                    let timestamp = Utc::now().timestamp();
                    envelope["timestamp"] = json!(timestamp.to_string());
                    envelope["sign"] = json!(sign_webhook(timestamp, secret));
                }
                self.post(Self::webhook_url(config)?, envelope).await
            },
        }
    }
}
