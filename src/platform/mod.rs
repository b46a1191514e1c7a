pub mod telegram;

#[cfg(test)]
pub mod testing;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// A new message observed in the monitored chat
#[derive(Debug, Clone)]
pub struct InboundEvent {
    /// Message id, unique within the monitored chat
    pub message_id: i32,
    pub chat_id: i64,
    /// User id, or the chat id when a channel posts as itself
    pub sender_id: Option<i64>,
    /// Text, or the caption for media messages
    pub text: Option<String>,
    pub date: DateTime<Utc>,
    /// Forum topic the message belongs to
    pub topic_id: Option<i32>,
    /// Whether the message was posted inside a forum topic
    pub is_topic_message: bool,
    /// Channel post rather than a group message
    pub is_broadcast: bool,
    pub reply_to: Option<ReplyRef>,
}

/// The message an event replies to, as shown in the notification
#[derive(Debug, Clone, PartialEq)]
pub struct ReplyRef {
    pub sender_name: String,
    pub text: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SenderProfile {
    pub id: i64,
    pub username: Option<String>,
    pub first_name: String,
}

impl SenderProfile {
    /// Placeholder used when the sender cannot be looked up
    pub fn unknown(id: i64) -> Self {
        Self {
            id,
            username: None,
            first_name: "Unknown".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatInfo {
    pub id: i64,
    pub title: Option<String>,
    pub is_forum: bool,
    pub is_broadcast: bool,
}

/// How the delivery connection should render outgoing text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderMode {
    #[default]
    Markdown,
    Plain,
}

#[derive(Debug, thiserror::Error)]
pub enum LookupError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("transport error: {0}")]
    Transport(String),
}

/// Read side of the bridge: metadata lookups against the monitored chat.
#[async_trait]
pub trait SourceClient: Send + Sync {
    async fn sender_profile(&self, chat_id: i64, sender_id: i64)
        -> Result<SenderProfile, LookupError>;

    async fn chat_info(&self, chat_id: i64) -> Result<ChatInfo, LookupError>;

    async fn topic_title(&self, chat_id: i64, topic_id: i32) -> Result<String, LookupError>;
}

/// Write side of the bridge: the only thing the delivery identity can do.
#[async_trait]
pub trait DeliveryClient: Send + Sync {
    async fn send_text(&self, chat_id: i64, text: &str, mode: RenderMode) -> Result<()>;
}
