use std::{fmt, str::FromStr};

use alloy::primitives::B256;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::flow::FlowStatus;

/// Notification delivery channels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Telegram,
    Lark,
    Feishu,
    Discord,
    Slack,
}

impl Channel {
    pub const ALL: [Channel; 5] = [
        Channel::Telegram,
        Channel::Lark,
        Channel::Feishu,
        Channel::Discord,
        Channel::Slack,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Telegram => "telegram",
            Self::Lark => "lark",
            Self::Feishu => "feishu",
            Self::Discord => "discord",
            Self::Slack => "slack",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Error)]
#[error("unknown notification channel {0:?}")]
pub struct ParseChannelError(String);

impl FromStr for Channel {
    type Err = ParseChannelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "telegram" => Ok(Self::Telegram),
            "lark" => Ok(Self::Lark),
            "feishu" => Ok(Self::Feishu),
            "discord" => Ok(Self::Discord),
            "slack" => Ok(Self::Slack),
            other => Err(ParseChannelError(other.to_string())),
        }
    }
}

/// How a user address is related to a timelock contract. The dispatcher only
/// consumes these; proposer/executor/canceller rows are maintained by the
/// flow projector, the rest by authoring flows elsewhere.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContractRole {
    Creator,
    Proposer,
    Executor,
    Canceller,
    Admin,
    PendingAdmin,
    Imported,
}

impl ContractRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Creator => "creator",
            Self::Proposer => "proposer",
            Self::Executor => "executor",
            Self::Canceller => "canceller",
            Self::Admin => "admin",
            Self::PendingAdmin => "pending_admin",
            Self::Imported => "imported",
        }
    }
}

/// A user's delivery settings for one channel, unique per
/// (user, channel, name).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NotificationConfig {
    pub id: i64,
    pub user_address: String,
    pub channel: Channel,
    pub name: String,
    /// Telegram bot token.
    pub bot_token: Option<String>,
    /// Telegram chat id.
    pub chat_id: Option<String>,
    /// Webhook URL for Lark/Feishu/Discord/Slack.
    pub webhook_url: Option<String>,
    /// Optional Lark/Feishu signing secret.
    pub secret: Option<String>,
    pub is_active: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Success,
    Failed,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }
}

/// The delivery idempotency key: at most one successful delivery exists per
/// key.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeliveryKey {
    pub channel: Channel,
    pub user_address: String,
    pub config_id: i64,
    pub flow_id: B256,
    pub status_to: FlowStatus,
}

/// One delivery attempt, appended to the notification log.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DeliveryRecord {
    pub key: DeliveryKey,
    pub status: DeliveryStatus,
    pub error: Option<String>,
    pub sent_at: DateTime<Utc>,
}
