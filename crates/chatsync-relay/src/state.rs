use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;

use chatsync_types::StreamingBroadcast;
use crate::config::Config;

/// Shared application state passed to all handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub hub: Arc<BroadcastHub>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let hub = BroadcastHub::new(config.relay.channel_capacity);
        Self {
            config: Arc::new(config),
            hub: Arc::new(hub),
        }
    }
}

/// One broadcast channel per user.
///
/// Every session of a user subscribes to the same channel and receives every
/// frame, its own included; sessions filter their echoes themselves.
pub struct BroadcastHub {
    channels: Mutex<HashMap<String, broadcast::Sender<StreamingBroadcast>>>,
    capacity: usize,
}

impl BroadcastHub {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Fan a frame out to the user's live subscribers. Returns how many got it.
    pub fn publish(&self, user_id: &str, frame: StreamingBroadcast) -> usize {
        let channels = self.channels.lock();
        match channels.get(user_id) {
            Some(sender) => sender.send(frame).unwrap_or(0),
            None => 0,
        }
    }

    pub fn subscribe(&self, user_id: &str) -> broadcast::Receiver<StreamingBroadcast> {
        self.channels
            .lock()
            .entry(user_id.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Drop channels nobody listens to any more. Returns how many were removed.
    pub fn prune(&self) -> usize {
        let mut channels = self.channels.lock();
        let before = channels.len();
        channels.retain(|_, sender| sender.receiver_count() > 0);
        before - channels.len()
    }

    pub fn channel_count(&self) -> usize {
        self.channels.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatsync_types::SessionId;
    use chrono::Utc;

    fn frame(message_id: &str) -> StreamingBroadcast {
        StreamingBroadcast::Update {
            session_id: SessionId::from("s1"),
            thread_id: "t1".to_string(),
            message_id: message_id.to_string(),
            content: "Hello".to_string(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_frames_stay_within_one_user() {
        let hub = BroadcastHub::new(8);
        let mut alice = hub.subscribe("alice");
        let mut bob = hub.subscribe("bob");

        assert_eq!(hub.publish("alice", frame("m1")), 1);

        assert_eq!(alice.recv().await.unwrap().message_id(), "m1");
        assert!(bob.try_recv().is_err());
    }

    #[test]
    fn test_publish_without_subscribers_is_dropped() {
        let hub = BroadcastHub::new(8);
        assert_eq!(hub.publish("nobody", frame("m1")), 0);
        assert_eq!(hub.channel_count(), 0);
    }

    #[test]
    fn test_prune_removes_abandoned_channels() {
        let hub = BroadcastHub::new(8);
        let kept = hub.subscribe("alice");
        drop(hub.subscribe("bob"));

        assert_eq!(hub.prune(), 1);
        assert_eq!(hub.channel_count(), 1);
        drop(kept);
    }
}
