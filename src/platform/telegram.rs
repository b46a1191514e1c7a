use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use teloxide::payloads::SendMessageSetters;
use teloxide::prelude::*;
use teloxide::types::{Chat, MessageKind, ParseMode, User};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::platform::{
    ChatInfo, DeliveryClient, InboundEvent, LookupError, RenderMode, ReplyRef, SenderProfile,
    SourceClient,
};

/// The two bot identities, started and dropped together.
pub struct Sessions {
    /// Member of the monitored chat; reads updates and answers lookups
    pub source: Bot,
    /// Only posts to the notification destination
    pub delivery: Bot,
}

impl Sessions {
    /// Verify both tokens before anything is served. Either failing is fatal.
    pub async fn connect(config: &Config) -> Result<Self> {
        let source = Bot::new(&config.source.bot_token);
        let delivery = Bot::new(&config.delivery.bot_token);

        let (source_me, delivery_me) =
            futures::future::try_join(source.get_me().send(), delivery.get_me().send())
                .await
                .context("Failed to authenticate Telegram bots")?;

        info!(
            "Source identity connected: @{} ({})",
            source_me.username(),
            source_me.user.id
        );
        info!(
            "Delivery identity connected: @{} ({})",
            delivery_me.username(),
            delivery_me.user.id
        );

        Ok(Self { source, delivery })
    }
}

/// Read side backed by the source bot.
///
/// The Bot API has no "list forum topics" call, so topic titles are learned
/// from topic service messages seen in the update stream (every topic post
/// carries its topic-root message as `reply_to_message`). Sender and chat
/// metadata are likewise cached from observed messages, with `getChatMember`
/// as the fallback for users.
pub struct TelegramSource {
    bot: Bot,
    chat_id: ChatId,
    senders: RwLock<HashMap<i64, SenderProfile>>,
    chats: RwLock<HashMap<i64, ChatInfo>>,
    topics: RwLock<HashMap<i32, String>>,
}

impl TelegramSource {
    pub fn new(bot: Bot, chat_id: i64) -> Self {
        Self {
            bot,
            chat_id: ChatId(chat_id),
            senders: RwLock::new(HashMap::new()),
            chats: RwLock::new(HashMap::new()),
            topics: RwLock::new(HashMap::new()),
        }
    }

    /// Listen for new messages in the monitored chat and queue them for the
    /// forwarder until Ctrl-C. Returning drops `events`, closing the queue.
    pub async fn listen(self: Arc<Self>, events: mpsc::Sender<InboundEvent>) -> Result<()> {
        let bot = self.bot.clone();

        info!("Listening for messages in chat {}", self.chat_id);

        let handler = dptree::entry()
            .branch(Update::filter_message().endpoint(handle_message))
            .branch(Update::filter_channel_post().endpoint(handle_message));

        Dispatcher::builder(bot, handler)
            .dependencies(dptree::deps![self, events])
            .default_handler(|upd| async move {
                debug!("Unhandled update: {:?}", upd.id);
            })
            .error_handler(LoggingErrorHandler::with_custom_text("source listener"))
            .enable_ctrlc_handler()
            .build()
            .dispatch()
            .await;

        info!("Source listener stopped");
        Ok(())
    }

    /// Remember sender, chat and topic metadata carried by a message.
    async fn observe(&self, msg: &Message) {
        if let Some(profile) = sender_of(msg) {
            self.senders.write().await.insert(profile.id, profile);
        }

        {
            let mut chats = self.chats.write().await;
            let entry = chats.entry(msg.chat.id.0).or_insert_with(|| ChatInfo {
                id: msg.chat.id.0,
                title: None,
                is_forum: false,
                is_broadcast: false,
            });
            entry.title = msg.chat.title().map(str::to_string);
            entry.is_broadcast = msg.chat.is_channel();
            entry.is_forum |= msg.is_topic_message;
        }

        let mut topics = self.topics.write().await;
        for m in std::iter::once(msg).chain(msg.reply_to_message()) {
            if let Some(created) = m.forum_topic_created() {
                topics.insert(m.id.0, created.name.clone());
            }
            if let (Some(edited), Some(thread)) = (m.forum_topic_edited(), m.thread_id) {
                if let Some(name) = &edited.name {
                    topics.insert(thread.0 .0, name.clone());
                }
            }
        }
    }
}

async fn handle_message(
    msg: Message,
    source: Arc<TelegramSource>,
    events: mpsc::Sender<InboundEvent>,
) -> ResponseResult<()> {
    if msg.chat.id != source.chat_id {
        debug!("Ignoring message from unmonitored chat {}", msg.chat.id);
        return Ok(());
    }

    source.observe(&msg).await;

    // Service messages (joins, pins, topic changes) are metadata only
    if !matches!(msg.kind, MessageKind::Common(_)) {
        return Ok(());
    }

    if events.send(to_event(&msg)).await.is_err() {
        warn!("Forwarder queue closed, dropping message {}", msg.id);
    }
    Ok(())
}

fn to_event(msg: &Message) -> InboundEvent {
    InboundEvent {
        message_id: msg.id.0,
        chat_id: msg.chat.id.0,
        sender_id: sender_of(msg).map(|s| s.id),
        text: body_of(msg),
        date: msg.date,
        topic_id: msg.thread_id.map(|t| t.0 .0),
        is_topic_message: msg.is_topic_message,
        is_broadcast: msg.chat.is_channel(),
        reply_to: reply_of(msg),
    }
}

fn body_of(msg: &Message) -> Option<String> {
    msg.text().or_else(|| msg.caption()).map(str::to_string)
}

/// The chat a message was sent on behalf of wins over the placeholder user
/// Telegram puts in `from` for those messages.
fn sender_of(msg: &Message) -> Option<SenderProfile> {
    msg.sender_chat
        .as_ref()
        .map(profile_from_chat)
        .or_else(|| msg.from.as_ref().map(profile_from_user))
}

fn reply_of(msg: &Message) -> Option<ReplyRef> {
    let reply = msg.reply_to_message()?;
    // Inside forum topics the topic root shows up as an implicit reply
    if reply.forum_topic_created().is_some() {
        return None;
    }
    let sender_name = sender_of(reply)
        .map(|s| s.username.unwrap_or(s.first_name))
        .unwrap_or_else(|| "Unknown".to_string());
    Some(ReplyRef {
        sender_name,
        text: body_of(reply),
    })
}

fn profile_from_user(user: &User) -> SenderProfile {
    SenderProfile {
        id: user.id.0 as i64,
        username: user.username.clone(),
        first_name: user.first_name.clone(),
    }
}

fn profile_from_chat(chat: &Chat) -> SenderProfile {
    SenderProfile {
        id: chat.id.0,
        username: chat.username().map(str::to_string),
        first_name: chat.title().unwrap_or("Unknown").to_string(),
    }
}

#[async_trait]
impl SourceClient for TelegramSource {
    async fn sender_profile(
        &self,
        chat_id: i64,
        sender_id: i64,
    ) -> Result<SenderProfile, LookupError> {
        if let Some(profile) = self.senders.read().await.get(&sender_id) {
            return Ok(profile.clone());
        }
        if sender_id <= 0 {
            return Err(LookupError::NotFound(format!("sender chat {}", sender_id)));
        }

        let member = self
            .bot
            .get_chat_member(ChatId(chat_id), UserId(sender_id as u64))
            .await
            .map_err(|e| LookupError::Transport(e.to_string()))?;
        let profile = profile_from_user(&member.user);
        self.senders.write().await.insert(sender_id, profile.clone());
        Ok(profile)
    }

    async fn chat_info(&self, chat_id: i64) -> Result<ChatInfo, LookupError> {
        self.chats
            .read()
            .await
            .get(&chat_id)
            .cloned()
            .ok_or_else(|| LookupError::NotFound(format!("chat {}", chat_id)))
    }

    async fn topic_title(&self, _chat_id: i64, topic_id: i32) -> Result<String, LookupError> {
        self.topics
            .read()
            .await
            .get(&topic_id)
            .cloned()
            .ok_or_else(|| LookupError::NotFound(format!("topic {}", topic_id)))
    }
}

/// Write side backed by the delivery bot.
pub struct TelegramDelivery {
    bot: Bot,
}

impl TelegramDelivery {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl DeliveryClient for TelegramDelivery {
    async fn send_text(&self, chat_id: i64, text: &str, mode: RenderMode) -> Result<()> {
        let request = self.bot.send_message(ChatId(chat_id), text);
        match mode {
            RenderMode::Markdown => request.parse_mode(ParseMode::MarkdownV2).await?,
            RenderMode::Plain => request.await?,
        };
        Ok(())
    }
}
