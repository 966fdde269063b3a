use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, Mutex};

use crate::db::Message;

const CHANNEL_CAPACITY: usize = 256;

/// Events pushed to connected clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LiveEvent {
    NewMessage { message: Message },
    MessageUpdated { message: Message },
    MessageDeleted { message: Message },
    OnlineUsers { user_ids: Vec<String> },
    /// The receiver fell behind and should refetch.
    EventsMissed { count: u64 },
}

impl LiveEvent {
    pub fn message(&self) -> Option<&Message> {
        match self {
            LiveEvent::NewMessage { message }
            | LiveEvent::MessageUpdated { message }
            | LiveEvent::MessageDeleted { message } => Some(message),
            LiveEvent::OnlineUsers { .. } | LiveEvent::EventsMissed { .. } => None,
        }
    }
}

/// An event plus who may see it. An empty recipient list means everyone.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub recipients: Vec<String>,
    pub event: LiveEvent,
}

impl Delivery {
    pub fn is_for(&self, user_id: &str) -> bool {
        self.recipients.is_empty() || self.recipients.iter().any(|r| r == user_id)
    }
}

/// Fan-out shared by the WebSocket handler and the message handlers
#[derive(Clone)]
pub struct LiveHub {
    tx: broadcast::Sender<Delivery>,
    // user id -> open connection count
    online: Arc<Mutex<BTreeMap<String, usize>>>,
}

impl LiveHub {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            tx,
            online: Arc::new(Mutex::new(BTreeMap::new())),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Delivery> {
        self.tx.subscribe()
    }

    /// Publish a message event to both participants.
    pub fn publish(&self, event: LiveEvent) {
        let recipients = match event.message() {
            Some(m) => vec![m.sender_id.clone(), m.receiver_id.clone()],
            None => Vec::new(),
        };

        // Err only means nobody is listening
        if self.tx.send(Delivery { recipients, event }).is_err() {
            tracing::trace!("live event dropped, no subscribers");
        }
    }

    /// Register a connection and broadcast the roster.
    pub async fn connect(&self, user_id: &str) {
        let roster = {
            let mut online = self.online.lock().await;
            *online.entry(user_id.to_string()).or_insert(0) += 1;
            online.keys().cloned().collect::<Vec<_>>()
        };
        tracing::debug!(user_id, online = roster.len(), "live connection opened");
        self.publish(LiveEvent::OnlineUsers { user_ids: roster });
    }

    pub async fn disconnect(&self, user_id: &str) {
        let roster = {
            let mut online = self.online.lock().await;
            if let Some(count) = online.get_mut(user_id) {
                *count -= 1;
                if *count == 0 {
                    online.remove(user_id);
                }
            }
            online.keys().cloned().collect::<Vec<_>>()
        };
        tracing::debug!(user_id, online = roster.len(), "live connection closed");
        self.publish(LiveEvent::OnlineUsers { user_ids: roster });
    }

    pub async fn online_users(&self) -> Vec<String> {
        self.online.lock().await.keys().cloned().collect()
    }
}

impl Default for LiveHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(sender: &str, receiver: &str) -> Message {
        Message {
            id: "m1".into(),
            sender_id: sender.into(),
            receiver_id: receiver.into(),
            text: Some("hi".into()),
            image: None,
            edited: false,
            deleted: false,
            created_at: 1,
            updated_at: 1,
        }
    }

    #[tokio::test]
    async fn test_message_events_addressed_to_participants() {
        let hub = LiveHub::new();
        let mut rx = hub.subscribe();

        hub.publish(LiveEvent::NewMessage { message: message("a", "b") });

        let delivery = rx.recv().await.unwrap();
        assert!(delivery.is_for("a"));
        assert!(delivery.is_for("b"));
        assert!(!delivery.is_for("c"));
    }

    #[tokio::test]
    async fn test_roster_counts_connections() {
        let hub = LiveHub::new();

        hub.connect("a").await;
        hub.connect("a").await;
        hub.connect("b").await;
        assert_eq!(hub.online_users().await, vec!["a", "b"]);

        hub.disconnect("a").await;
        assert_eq!(hub.online_users().await, vec!["a", "b"]);

        hub.disconnect("a").await;
        assert_eq!(hub.online_users().await, vec!["b"]);
    }

    #[tokio::test]
    async fn test_roster_broadcast_to_everyone() {
        let hub = LiveHub::new();
        let mut rx = hub.subscribe();

        hub.connect("a").await;

        let delivery = rx.recv().await.unwrap();
        assert!(delivery.is_for("anyone"));
        assert_eq!(
            delivery.event,
            LiveEvent::OnlineUsers { user_ids: vec!["a".to_string()] }
        );
    }

    #[test]
    fn test_wire_format() {
        let json = serde_json::to_value(LiveEvent::EventsMissed { count: 3 }).unwrap();
        assert_eq!(json, serde_json::json!({"type": "events_missed", "count": 3}));
    }
}
