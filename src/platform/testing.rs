//! In-memory stand-ins for the two Telegram identities.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::{bail, Result};
use async_trait::async_trait;

use super::{ChatInfo, DeliveryClient, LookupError, RenderMode, SenderProfile, SourceClient};

#[derive(Default)]
pub struct FakeSource {
    pub senders: HashMap<i64, SenderProfile>,
    pub chats: HashMap<i64, ChatInfo>,
    pub topics: HashMap<i32, String>,
    pub fail_topics: bool,
}

impl FakeSource {
    pub fn with_chat(mut self, chat: ChatInfo) -> Self {
        self.chats.insert(chat.id, chat);
        self
    }

    pub fn with_sender(mut self, id: i64, username: Option<&str>, first_name: &str) -> Self {
        self.senders.insert(
            id,
            SenderProfile {
                id,
                username: username.map(str::to_string),
                first_name: first_name.to_string(),
            },
        );
        self
    }

    pub fn with_topic(mut self, id: i32, title: &str) -> Self {
        self.topics.insert(id, title.to_string());
        self
    }
}

#[async_trait]
impl SourceClient for FakeSource {
    async fn sender_profile(
        &self,
        _chat_id: i64,
        sender_id: i64,
    ) -> Result<SenderProfile, LookupError> {
        self.senders
            .get(&sender_id)
            .cloned()
            .ok_or_else(|| LookupError::NotFound(format!("sender {}", sender_id)))
    }

    async fn chat_info(&self, chat_id: i64) -> Result<ChatInfo, LookupError> {
        self.chats
            .get(&chat_id)
            .cloned()
            .ok_or_else(|| LookupError::NotFound(format!("chat {}", chat_id)))
    }

    async fn topic_title(&self, _chat_id: i64, topic_id: i32) -> Result<String, LookupError> {
        if self.fail_topics {
            return Err(LookupError::Transport("connection reset".to_string()));
        }
        self.topics
            .get(&topic_id)
            .cloned()
            .ok_or_else(|| LookupError::NotFound(format!("topic {}", topic_id)))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SentMessage {
    pub chat_id: i64,
    pub text: String,
    pub mode: RenderMode,
}

#[derive(Default)]
pub struct RecordingDelivery {
    pub sent: Mutex<Vec<SentMessage>>,
    pub fail: bool,
}

impl RecordingDelivery {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl DeliveryClient for RecordingDelivery {
    async fn send_text(&self, chat_id: i64, text: &str, mode: RenderMode) -> Result<()> {
        self.sent.lock().unwrap().push(SentMessage {
            chat_id,
            text: text.to_string(),
            mode,
        });
        if self.fail {
            bail!("Bad Request: chat not found");
        }
        Ok(())
    }
}
