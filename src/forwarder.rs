use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono_tz::Tz;
use futures::FutureExt;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::dedup::{DedupCache, Fingerprint};
use crate::delivery::Delivery;
use crate::filter::TargetFilter;
use crate::format::{format_message, FormatContext};
use crate::mute::MuteWindow;
use crate::platform::{ChatInfo, InboundEvent, SenderProfile, SourceClient};
use crate::resolved::Resolved;
use crate::topics::TopicResolver;

/// What happened to one inbound event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Forwarded,
    /// Sender missing or not on the allow-list
    Ignored,
    Muted,
    Duplicate,
    /// Formatted and recorded, but the send failed. Not retried.
    DeliveryFailed,
}

/// Shared handle to the dedup cache, also swept by the scheduler.
pub type SharedDedup = Arc<Mutex<DedupCache>>;

/// Runs every inbound event through filter, mute window, dedup, formatting
/// and delivery. One instance per process, consuming a single queue.
pub struct Forwarder {
    filter: TargetFilter,
    mute: Option<MuteWindow>,
    timezone: Tz,
    dedup: SharedDedup,
    source: Arc<dyn SourceClient>,
    topics: TopicResolver,
    delivery: Delivery,
    clock: Arc<dyn Clock>,
}

impl Forwarder {
    pub fn new(
        filter: TargetFilter,
        mute: Option<MuteWindow>,
        timezone: Tz,
        dedup: SharedDedup,
        source: Arc<dyn SourceClient>,
        delivery: Delivery,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            filter,
            mute,
            timezone,
            dedup,
            topics: TopicResolver::new(source.clone()),
            source,
            delivery,
            clock,
        }
    }

    /// Process events in arrival order until every sender half is dropped.
    /// Events already queued at that point are still handled.
    pub async fn run(self, mut events: mpsc::Receiver<InboundEvent>) {
        info!("Forwarder started");
        while let Some(event) = events.recv().await {
            let handled = AssertUnwindSafe(self.handle(&event)).catch_unwind().await;
            match handled {
                Ok(outcome) => debug!(
                    "Message {} from {:?}: {:?}",
                    event.message_id, event.sender_id, outcome
                ),
                Err(_) => error!(
                    "Unexpected failure handling message {} from {:?} in chat {}",
                    event.message_id, event.sender_id, event.chat_id
                ),
            }
        }
        info!("Event queue closed, forwarder stopped");
    }

    pub async fn handle(&self, event: &InboundEvent) -> Outcome {
        let sender_id = match event.sender_id {
            Some(id) => id,
            None => {
                warn!("Message {} has no sender, ignoring", event.message_id);
                return Outcome::Ignored;
            }
        };

        if !self.filter.allows(sender_id) {
            debug!("Sender {} not targeted, ignoring", sender_id);
            return Outcome::Ignored;
        }

        let now = self.clock.now();
        if let Some(window) = &self.mute {
            if window.is_muted_at(now) {
                info!(
                    "Message {} from {} received during mute period ({}), dropping",
                    event.message_id,
                    sender_id,
                    window.describe()
                );
                return Outcome::Muted;
            }
        }

        let fingerprint = Fingerprint::new(sender_id, event.message_id);
        if self.dedup.lock().await.seen(&fingerprint, now) {
            debug!("Duplicate message {}, skipping", fingerprint);
            return Outcome::Duplicate;
        }

        let sender = self.resolve_sender(event.chat_id, sender_id).await;
        let chat = self.resolve_chat(event).await;
        debug!(
            "Formatting message {} for chat {} ({})",
            fingerprint,
            chat.id,
            chat.title.as_deref().unwrap_or("untitled")
        );

        let topic = match event.topic_id {
            Some(topic_id) if event.is_topic_message || chat.is_forum => {
                Some(self.topics.resolve(event.chat_id, topic_id).await.into_inner())
            }
            _ => None,
        };

        let formatted = format_message(&FormatContext {
            event,
            sender: sender.value(),
            chat: &chat,
            topic: topic.as_deref(),
            timezone: self.timezone,
            mode: self.delivery.mode(),
        });
        if formatted.is_fallback() {
            warn!("Forwarding message {} in degraded format", fingerprint);
        }

        self.dedup.lock().await.record(fingerprint, now);

        match self.delivery.deliver(formatted.value()).await {
            Ok(()) => {
                info!("Message {} forwarded from {}", fingerprint, sender_label(sender.value()));
                Outcome::Forwarded
            }
            Err(e) => {
                error!("Error forwarding message {}: {:#}", fingerprint, e);
                Outcome::DeliveryFailed
            }
        }
    }

    async fn resolve_sender(&self, chat_id: i64, sender_id: i64) -> Resolved<SenderProfile> {
        match self.source.sender_profile(chat_id, sender_id).await {
            Ok(profile) => Resolved::Found(profile),
            Err(e) => {
                warn!("Failed to look up sender {}: {}", sender_id, e);
                Resolved::Fallback(SenderProfile::unknown(sender_id))
            }
        }
    }

    async fn resolve_chat(&self, event: &InboundEvent) -> ChatInfo {
        match self.source.chat_info(event.chat_id).await {
            Ok(chat) => chat,
            Err(e) => {
                warn!("Failed to look up chat {}: {}", event.chat_id, e);
                ChatInfo {
                    id: event.chat_id,
                    title: None,
                    is_forum: event.is_topic_message,
                    is_broadcast: event.is_broadcast,
                }
            }
        }
    }
}

fn sender_label(sender: &SenderProfile) -> &str {
    sender.username.as_deref().unwrap_or(&sender.first_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::testing::FixedClock;
    use crate::platform::testing::{FakeSource, RecordingDelivery};
    use crate::platform::RenderMode;
    use chrono::{DateTime, NaiveTime, TimeZone, Utc};
    use std::num::NonZeroUsize;

    const SOURCE_CHAT: i64 = -1002083186778;
    const DESTINATION: i64 = 424242;

    struct Harness {
        forwarder: Forwarder,
        delivery: Arc<RecordingDelivery>,
        dedup: SharedDedup,
        clock: Arc<FixedClock>,
    }

    fn pacific(h: u32, m: u32) -> DateTime<Utc> {
        Tz::US__Pacific
            .with_ymd_and_hms(2025, 1, 15, h, m, 0)
            .unwrap()
            .with_timezone(&Utc)
    }

    fn group_chat(is_forum: bool) -> ChatInfo {
        ChatInfo {
            id: SOURCE_CHAT,
            title: Some("Alpha Calls".to_string()),
            is_forum,
            is_broadcast: false,
        }
    }

    fn harness_with(source: FakeSource, delivery: RecordingDelivery) -> Harness {
        let delivery = Arc::new(delivery);
        let dedup: SharedDedup = Arc::new(Mutex::new(DedupCache::new(
            NonZeroUsize::new(100).unwrap(),
            None,
        )));
        let clock = Arc::new(FixedClock::new(pacific(10, 0)));
        let mute = MuteWindow::new(
            NaiveTime::from_hms_opt(7, 0, 0).unwrap(),
            NaiveTime::from_hms_opt(7, 30, 0).unwrap(),
            Tz::US__Pacific,
        );
        let forwarder = Forwarder::new(
            TargetFilter::new([111, 222]),
            Some(mute),
            Tz::US__Pacific,
            dedup.clone(),
            Arc::new(source),
            Delivery::new(delivery.clone(), DESTINATION, RenderMode::Markdown),
            clock.clone(),
        );
        Harness {
            forwarder,
            delivery,
            dedup,
            clock,
        }
    }

    fn harness() -> Harness {
        let source = FakeSource::default()
            .with_chat(group_chat(false))
            .with_sender(111, Some("alice"), "Alice")
            .with_sender(222, None, "Bob");
        harness_with(source, RecordingDelivery::default())
    }

    fn event(sender_id: i64, message_id: i32, text: Option<&str>) -> InboundEvent {
        InboundEvent {
            message_id,
            chat_id: SOURCE_CHAT,
            sender_id: Some(sender_id),
            text: text.map(str::to_string),
            date: pacific(10, 0),
            topic_id: None,
            is_topic_message: false,
            is_broadcast: false,
            reply_to: None,
        }
    }

    #[tokio::test]
    async fn test_targeted_message_is_forwarded() {
        let h = harness();

        let outcome = h.forwarder.handle(&event(111, 42, Some("hello"))).await;

        assert_eq!(outcome, Outcome::Forwarded);
        let sent = h.delivery.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].chat_id, DESTINATION);
        assert_eq!(sent[0].mode, RenderMode::Markdown);
        assert!(sent[0].text.contains("hello"));
        assert!(sent[0].text.contains("@alice"));
        assert!(!sent[0].text.contains("Topic"));
        assert_eq!(h.dedup.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn test_replayed_fingerprint_is_suppressed() {
        let h = harness();

        h.forwarder.handle(&event(111, 42, Some("hello"))).await;
        let outcome = h
            .forwarder
            .handle(&event(111, 42, Some("edited content")))
            .await;

        assert_eq!(outcome, Outcome::Duplicate);
        assert_eq!(h.delivery.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_same_message_id_from_other_sender_is_distinct() {
        let h = harness();

        h.forwarder.handle(&event(111, 42, Some("a"))).await;
        let outcome = h.forwarder.handle(&event(222, 42, Some("b"))).await;

        assert_eq!(outcome, Outcome::Forwarded);
        assert_eq!(h.delivery.sent().len(), 2);
    }

    #[tokio::test]
    async fn test_muted_window_drops_without_recording() {
        let h = harness();
        h.clock.set(pacific(7, 15));

        let outcome = h.forwarder.handle(&event(111, 42, Some("hello"))).await;

        assert_eq!(outcome, Outcome::Muted);
        assert!(h.delivery.sent().is_empty());
        assert_eq!(h.dedup.lock().await.len(), 0);
    }

    #[tokio::test]
    async fn test_muted_message_is_not_replayed_later() {
        let h = harness();
        h.clock.set(pacific(7, 15));
        h.forwarder.handle(&event(111, 42, Some("hello"))).await;

        // A different message after the window reopens goes through normally
        h.clock.set(pacific(7, 30));
        let outcome = h.forwarder.handle(&event(111, 43, Some("later"))).await;

        assert_eq!(outcome, Outcome::Forwarded);
        let sent = h.delivery.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].text.contains("later"));
    }

    #[tokio::test]
    async fn test_untargeted_sender_is_ignored() {
        let h = harness();

        let outcome = h.forwarder.handle(&event(999, 42, Some("spam"))).await;

        assert_eq!(outcome, Outcome::Ignored);
        assert!(h.delivery.sent().is_empty());
        assert_eq!(h.dedup.lock().await.len(), 0);
    }

    #[tokio::test]
    async fn test_missing_sender_is_ignored() {
        let h = harness();
        let mut ev = event(111, 42, Some("hello"));
        ev.sender_id = None;

        assert_eq!(h.forwarder.handle(&ev).await, Outcome::Ignored);
        assert!(h.delivery.sent().is_empty());
    }

    #[tokio::test]
    async fn test_topic_name_is_resolved_for_forum_messages() {
        let source = FakeSource::default()
            .with_chat(group_chat(true))
            .with_sender(111, Some("alice"), "Alice")
            .with_topic(9, "Signals");
        let h = harness_with(source, RecordingDelivery::default());
        let mut ev = event(111, 42, Some("long BTC"));
        ev.topic_id = Some(9);
        ev.is_topic_message = true;

        h.forwarder.handle(&ev).await;

        assert!(h.delivery.sent()[0].text.contains("🧵 *Topic*: Signals"));
    }

    #[tokio::test]
    async fn test_topic_lookup_failure_uses_fallback_name() {
        let source = FakeSource {
            fail_topics: true,
            ..FakeSource::default()
                .with_chat(group_chat(true))
                .with_sender(111, Some("alice"), "Alice")
        };
        let h = harness_with(source, RecordingDelivery::default());
        let mut ev = event(111, 42, Some("hi"));
        ev.topic_id = Some(9);
        ev.is_topic_message = true;

        assert_eq!(h.forwarder.handle(&ev).await, Outcome::Forwarded);
        assert!(h.delivery.sent()[0].text.contains(r"Unnamed Topic \(9\)"));
    }

    #[tokio::test]
    async fn test_thread_id_outside_forum_is_not_a_topic() {
        let h = harness();
        let mut ev = event(111, 42, Some("reply thread"));
        ev.topic_id = Some(12);

        h.forwarder.handle(&ev).await;

        assert!(!h.delivery.sent()[0].text.contains("Topic"));
    }

    #[tokio::test]
    async fn test_lookup_failures_still_forward() {
        let h = harness_with(FakeSource::default(), RecordingDelivery::default());

        let outcome = h.forwarder.handle(&event(111, 42, None)).await;

        assert_eq!(outcome, Outcome::Forwarded);
        let text = &h.delivery.sent()[0].text;
        assert!(text.contains("@Unknown"));
        assert!(text.contains(r"\[No text content\]"));
        assert!(text.contains("Private Chat"));
    }

    #[tokio::test]
    async fn test_delivery_failure_still_records_fingerprint() {
        let source = FakeSource::default()
            .with_chat(group_chat(false))
            .with_sender(111, Some("alice"), "Alice");
        let h = harness_with(source, RecordingDelivery::failing());

        let first = h.forwarder.handle(&event(111, 42, Some("hello"))).await;
        let second = h.forwarder.handle(&event(111, 42, Some("hello"))).await;

        assert_eq!(first, Outcome::DeliveryFailed);
        assert_eq!(second, Outcome::Duplicate);
        assert_eq!(h.delivery.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_run_drains_queue_after_close() {
        let h = harness();
        let (tx, rx) = mpsc::channel(8);

        tx.send(event(111, 1, Some("one"))).await.unwrap();
        tx.send(event(999, 2, Some("ignored"))).await.unwrap();
        tx.send(event(111, 1, Some("dup"))).await.unwrap();
        tx.send(event(222, 3, Some("three"))).await.unwrap();
        drop(tx);

        h.forwarder.run(rx).await;

        let sent = h.delivery.sent();
        assert_eq!(sent.len(), 2);
        assert!(sent[0].text.contains("one"));
        assert!(sent[1].text.contains("three"));
    }

    #[tokio::test]
    async fn test_chat_lookup_failure_keeps_event_chat() {
        let h = harness_with(FakeSource::default(), RecordingDelivery::default());
        let mut broadcast = event(111, 7, None);
        broadcast.is_broadcast = true;

        let chat = h.forwarder.resolve_chat(&broadcast).await;

        assert_eq!(chat.id, SOURCE_CHAT);
        assert_eq!(chat.title, None);
        assert!(chat.is_broadcast);
        assert!(!chat.is_forum);
    }

    #[tokio::test]
    async fn test_known_chat_is_resolved() {
        let h = harness();

        let chat = h.forwarder.resolve_chat(&event(111, 7, None)).await;

        assert_eq!(chat, group_chat(false));
    }
}
