use std::sync::Arc;

use tracing::warn;

use crate::platform::SourceClient;
use crate::resolved::Resolved;

/// Label used when a topic title cannot be looked up.
pub fn fallback_topic_name(topic_id: i32) -> String {
    format!("Unnamed Topic ({})", topic_id)
}

/// Translates forum topic ids into display names through the source connection.
pub struct TopicResolver {
    source: Arc<dyn SourceClient>,
}

impl TopicResolver {
    pub fn new(source: Arc<dyn SourceClient>) -> Self {
        Self { source }
    }

    /// Always yields a non-empty name; lookup failures degrade to the fallback label.
    pub async fn resolve(&self, chat_id: i64, topic_id: i32) -> Resolved<String> {
        match self.source.topic_title(chat_id, topic_id).await {
            Ok(title) if !title.trim().is_empty() => Resolved::Found(title),
            Ok(_) => {
                warn!("Topic {} in chat {} has an empty title", topic_id, chat_id);
                Resolved::Fallback(fallback_topic_name(topic_id))
            }
            Err(e) => {
                warn!(
                    "Failed to resolve topic {} in chat {}: {}",
                    topic_id, chat_id, e
                );
                Resolved::Fallback(fallback_topic_name(topic_id))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::testing::FakeSource;

    #[tokio::test]
    async fn test_resolves_known_topic() {
        let source = FakeSource::default().with_topic(7, "Announcements");
        let resolver = TopicResolver::new(Arc::new(source));

        let name = resolver.resolve(-100, 7).await;
        assert_eq!(name, Resolved::Found("Announcements".to_string()));
    }

    #[tokio::test]
    async fn test_unknown_topic_falls_back_with_id() {
        let resolver = TopicResolver::new(Arc::new(FakeSource::default()));

        let name = resolver.resolve(-100, 55).await;
        assert!(name.is_fallback());
        assert_eq!(name.value(), "Unnamed Topic (55)");
    }

    #[tokio::test]
    async fn test_transport_failure_falls_back() {
        let source = FakeSource {
            fail_topics: true,
            ..FakeSource::default().with_topic(7, "Announcements")
        };
        let resolver = TopicResolver::new(Arc::new(source));

        let name = resolver.resolve(-100, 7).await;
        assert!(name.is_fallback());
        assert!(name.value().contains('7'));
    }

    #[tokio::test]
    async fn test_blank_title_falls_back() {
        let source = FakeSource::default().with_topic(3, "   ");
        let resolver = TopicResolver::new(Arc::new(source));

        let name = resolver.resolve(-100, 3).await;
        assert_eq!(name, Resolved::Fallback("Unnamed Topic (3)".to_string()));
    }
}
