use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use chatsync_types::{SessionId, StreamingBroadcast};

pub type BroadcastFeed = Pin<Box<dyn Stream<Item = StreamingBroadcast> + Send>>;

/// Cross-session carrier for in-flight message content.
///
/// Delivery is best effort: frames may be dropped, duplicated or reordered.
/// Receivers rely on the monotonic merge rule, never on delivery guarantees.
#[async_trait]
pub trait BroadcastTransport: Send + Sync {
    /// Send a frame without waiting for delivery
    fn publish(&self, broadcast: StreamingBroadcast);

    /// Frames published by every session of this user, own ones included
    async fn subscribe(&self) -> anyhow::Result<BroadcastFeed>;
}

/// In-process transport over a `tokio::sync::broadcast` channel.
///
/// Clones share the channel, so engines holding clones see each other's frames.
/// Slow receivers skip the frames they lagged behind on.
#[derive(Clone)]
pub struct LocalTransport {
    sender: broadcast::Sender<StreamingBroadcast>,
}

impl LocalTransport {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for LocalTransport {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl BroadcastTransport for LocalTransport {
    fn publish(&self, broadcast: StreamingBroadcast) {
        let _ = self.sender.send(broadcast);
    }

    async fn subscribe(&self) -> anyhow::Result<BroadcastFeed> {
        let stream = BroadcastStream::new(self.sender.subscribe()).filter_map(|frame| {
            let frame = match frame {
                Ok(frame) => Some(frame),
                Err(e) => {
                    tracing::debug!("Streaming receiver skipped frames: {}", e);
                    None
                }
            };
            futures::future::ready(frame)
        });
        Ok(Box::pin(stream))
    }
}

/// This session's end of the streaming broadcast channel.
#[derive(Clone)]
pub struct StreamingChannel {
    session_id: SessionId,
    transport: Arc<dyn BroadcastTransport>,
}

impl StreamingChannel {
    pub fn new(session_id: SessionId, transport: Arc<dyn BroadcastTransport>) -> Self {
        Self {
            session_id,
            transport,
        }
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn announce_start(&self, thread_id: &str, message_id: &str, created_at: DateTime<Utc>) {
        self.transport.publish(StreamingBroadcast::Start {
            session_id: self.session_id.clone(),
            thread_id: thread_id.to_string(),
            message_id: message_id.to_string(),
            created_at,
        });
    }

    pub fn push_update(
        &self,
        thread_id: &str,
        message_id: &str,
        content: &str,
        created_at: DateTime<Utc>,
    ) {
        self.transport.publish(StreamingBroadcast::Update {
            session_id: self.session_id.clone(),
            thread_id: thread_id.to_string(),
            message_id: message_id.to_string(),
            content: content.to_string(),
            created_at,
        });
    }

    pub fn announce_end(
        &self,
        thread_id: &str,
        message_id: &str,
        content: &str,
        created_at: DateTime<Utc>,
    ) {
        self.transport.publish(StreamingBroadcast::End {
            session_id: self.session_id.clone(),
            thread_id: thread_id.to_string(),
            message_id: message_id.to_string(),
            content: content.to_string(),
            created_at,
        });
    }

    /// Frames from other sessions; this session's echoes are filtered out
    pub async fn incoming(&self) -> anyhow::Result<BroadcastFeed> {
        let own = self.session_id.clone();
        let feed = self.transport.subscribe().await?;
        Ok(Box::pin(feed.filter(move |frame| {
            futures::future::ready(frame.session_id() != &own)
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_own_echoes_are_filtered() {
        let transport = Arc::new(LocalTransport::default());
        let alice = StreamingChannel::new(SessionId::from("alice"), transport.clone());
        let bob = StreamingChannel::new(SessionId::from("bob"), transport.clone());

        let mut alice_feed = alice.incoming().await.unwrap();

        alice.announce_start("t1", "m1", Utc::now());
        bob.push_update("t1", "m2", "Hi", Utc::now());

        let frame = tokio::time::timeout(Duration::from_secs(1), alice_feed.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(frame.message_id(), "m2");
        assert_eq!(frame.session_id().as_str(), "bob");
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_harmless() {
        let transport = LocalTransport::new(4);
        assert_eq!(transport.receiver_count(), 0);
        transport.publish(StreamingBroadcast::Start {
            session_id: SessionId::generate(),
            thread_id: "t1".to_string(),
            message_id: "m1".to_string(),
            created_at: Utc::now(),
        });
    }
}
