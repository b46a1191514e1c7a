use chrono::{DateTime, Timelike, Utc};
use chrono_tz::Tz;
use tracing::error;

use crate::platform::{ChatInfo, InboundEvent, RenderMode, SenderProfile};
use crate::resolved::Resolved;

pub const NO_TEXT_PLACEHOLDER: &str = "[No text content]";
const SEPARATOR: &str = "━━━━━━━━━━━━━━━━";
const REPLY_PREVIEW_CHARS: usize = 200;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum FormatError {
    #[error("sender {0} has neither a username nor a first name")]
    NamelessSender(i64),
}

/// Everything the formatter needs for one notification.
pub struct FormatContext<'a> {
    pub event: &'a InboundEvent,
    pub sender: &'a SenderProfile,
    pub chat: &'a ChatInfo,
    pub topic: Option<&'a str>,
    pub timezone: Tz,
    pub mode: RenderMode,
}

/// Emoji for the time-of-day band an hour falls into.
pub fn time_of_day_emoji(hour: u32) -> &'static str {
    match hour {
        0..=5 => "🌙",
        6..=11 => "🌅",
        12..=17 => "☀️",
        _ => "🌆",
    }
}

/// `🌅 2025-01-04 08:06:30 PST`
pub fn format_timestamp(date: DateTime<Utc>, timezone: Tz) -> String {
    let local = date.with_timezone(&timezone);
    format!(
        "{} {}",
        time_of_day_emoji(local.hour()),
        local.format("%Y-%m-%d %H:%M:%S %Z")
    )
}

/// Build the notification text. Never fails: if the full template cannot be
/// produced the degraded one-line form is returned as a fallback.
pub fn format_message(ctx: &FormatContext<'_>) -> Resolved<String> {
    match try_format(ctx) {
        Ok(text) => Resolved::Found(text),
        Err(e) => {
            error!("Error formatting message {}: {}", ctx.event.message_id, e);
            Resolved::Fallback(degraded(ctx))
        }
    }
}

fn try_format(ctx: &FormatContext<'_>) -> Result<String, FormatError> {
    let m = Markup(ctx.mode);
    let sender_name =
        display_name(ctx.sender).ok_or(FormatError::NamelessSender(ctx.sender.id))?;

    let source_type = if ctx.event.is_broadcast || ctx.chat.is_broadcast {
        "Channel"
    } else {
        "Group"
    };
    let chat_title = ctx.chat.title.as_deref().unwrap_or("Private Chat");
    let body = ctx.event.text.as_deref().unwrap_or(NO_TEXT_PLACEHOLDER);

    let mut out = format!("🚨 {} 🚨\n\n", m.bold("New Message"));
    out.push_str(&format!(
        "📱 {}: {}\n",
        m.bold(source_type),
        m.code(chat_title)
    ));
    if let Some(topic) = ctx.topic {
        out.push_str(&format!("🧵 {}: {}\n", m.bold("Topic"), m.escape(topic)));
    }
    out.push_str(&format!(
        "👤 {}: @{}\n",
        m.bold("From"),
        m.escape(sender_name)
    ));
    out.push_str(&format!(
        "⏰ {}: {}\n\n",
        m.bold("Time"),
        m.escape(&format_timestamp(ctx.event.date, ctx.timezone))
    ));

    if let Some(reply) = &ctx.event.reply_to {
        let preview = reply
            .text
            .as_deref()
            .map(|t| truncate_chars(t, REPLY_PREVIEW_CHARS))
            .unwrap_or_else(|| NO_TEXT_PLACEHOLDER.to_string());
        out.push_str(&format!(
            "↪️ {} @{}:\n> {}\n\n",
            m.bold("Replying to"),
            m.escape(&reply.sender_name),
            m.escape(&preview)
        ));
    }

    out.push_str(&format!("📄 {}:\n", m.bold("Message")));
    out.push_str(&m.escape(body));
    out.push('\n');
    out.push_str(SEPARATOR);

    Ok(out)
}

fn degraded(ctx: &FormatContext<'_>) -> String {
    let m = Markup(ctx.mode);
    let sender = display_name(ctx.sender)
        .map(str::to_string)
        .unwrap_or_else(|| ctx.sender.id.to_string());
    let text = ctx.event.text.as_deref().unwrap_or("[No text]");
    format!(
        "New message from @{}: {}",
        m.escape(&sender),
        m.escape(text)
    )
}

fn display_name(sender: &SenderProfile) -> Option<&str> {
    sender
        .username
        .as_deref()
        .filter(|u| !u.trim().is_empty())
        .or_else(|| Some(sender.first_name.as_str()).filter(|n| !n.trim().is_empty()))
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}…", &text[..idx]),
        None => text.to_string(),
    }
}

/// Telegram MarkdownV2 helpers; pass-through in plain mode.
#[derive(Clone, Copy)]
struct Markup(RenderMode);

impl Markup {
    fn bold(&self, text: &str) -> String {
        match self.0 {
            RenderMode::Markdown => format!("*{}*", self.escape(text)),
            RenderMode::Plain => text.to_string(),
        }
    }

    fn code(&self, text: &str) -> String {
        match self.0 {
            // Only ` and \ are special inside a code entity
            RenderMode::Markdown => {
                format!("`{}`", escape_with(text, |c| matches!(c, '`' | '\\')))
            }
            RenderMode::Plain => text.to_string(),
        }
    }

    fn escape(&self, text: &str) -> String {
        match self.0 {
            RenderMode::Markdown => escape_with(text, |c| MARKDOWN_V2_SPECIAL.contains(c)),
            RenderMode::Plain => text.to_string(),
        }
    }
}

const MARKDOWN_V2_SPECIAL: &str = "_*[]()~`>#+-=|{}.!\\";

fn escape_with(text: &str, special: impl Fn(char) -> bool) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if special(c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
