use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, Notify};

use crate::client::api::{ChatApi, LiveFeed, MessageUpdate, NewMessage};
use crate::client::error::ClientError;
use crate::db::{Message, User};
use crate::live::LiveEvent;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    GetMessages(String),
    Send(String),
    Update(String, String),
    Delete(String),
}

pub fn user(id: &str, name: &str) -> User {
    User {
        id: id.to_string(),
        email: format!("{}@example.com", id),
        full_name: name.to_string(),
        password_hash: String::new(),
        profile_pic: String::new(),
        created_at: 0,
    }
}

pub fn message(id: &str, sender: &str, receiver: &str, text: &str) -> Message {
    Message {
        id: id.to_string(),
        sender_id: sender.to_string(),
        receiver_id: receiver.to_string(),
        text: Some(text.to_string()).filter(|t| !t.is_empty()),
        image: None,
        edited: false,
        deleted: false,
        created_at: 1_700_000_000_000,
        updated_at: 1_700_000_000_000,
    }
}

/// In-memory `ChatApi` for store and view tests
#[derive(Default)]
pub struct MockApi {
    me: String,
    history: Mutex<Vec<Message>>,
    calls: Mutex<Vec<Call>>,
    gates: Mutex<HashMap<String, Arc<Notify>>>,
    feeds: Mutex<Vec<mpsc::Sender<LiveEvent>>>,
    pub live_feed_calls: AtomicUsize,
    pub fail_updates: AtomicBool,
    pub fail_deletes: AtomicBool,
}

impl MockApi {
    pub fn new(me: &str, history: Vec<Message>) -> Self {
        Self {
            me: me.to_string(),
            history: Mutex::new(history),
            ..Default::default()
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    /// Holds `get_messages(peer_id)` until the returned gate is notified.
    pub fn gate(&self, peer_id: &str) -> Arc<Notify> {
        self.gates
            .lock()
            .entry(peer_id.to_string())
            .or_insert_with(|| Arc::new(Notify::new()))
            .clone()
    }

    pub fn open_feeds(&self) -> usize {
        self.feeds.lock().iter().filter(|tx| !tx.is_closed()).count()
    }

    pub fn push_live(&self, event: LiveEvent) {
        for tx in self.feeds.lock().iter() {
            let _ = tx.try_send(event.clone());
        }
    }

    fn modify(&self, id: &str, f: impl FnOnce(&mut Message)) -> Result<Message, ClientError> {
        let mut history = self.history.lock();
        let message = history
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or_else(|| ClientError::Status {
                status: 404,
                message: "Message not found".to_string(),
            })?;
        f(message);
        Ok(message.clone())
    }
}

#[async_trait]
impl ChatApi for MockApi {
    async fn get_users(&self) -> Result<Vec<User>, ClientError> {
        Ok(vec![user("peer-a", "Ada"), user("peer-b", "Bob")])
    }

    async fn get_messages(&self, peer_id: &str) -> Result<Vec<Message>, ClientError> {
        self.calls.lock().push(Call::GetMessages(peer_id.to_string()));

        let gate = self.gates.lock().get(peer_id).cloned();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        let me = self.me.clone();
        Ok(self
            .history
            .lock()
            .iter()
            .filter(|m| m.involves(&me, peer_id))
            .cloned()
            .collect())
    }

    async fn send_message(&self, peer_id: &str, body: &NewMessage) -> Result<Message, ClientError> {
        self.calls.lock().push(Call::Send(peer_id.to_string()));

        let mut history = self.history.lock();
        let id = format!("sent-{}", history.len());
        let mut created = message(&id, &self.me, peer_id, "");
        created.text = body.text.clone();
        created.image = body.image.clone();
        history.push(created.clone());
        Ok(created)
    }

    async fn update_message(&self, id: &str, update: &MessageUpdate) -> Result<Message, ClientError> {
        self.calls
            .lock()
            .push(Call::Update(id.to_string(), update.text.clone()));

        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(ClientError::Status {
                status: 500,
                message: "Internal server error".to_string(),
            });
        }

        self.modify(id, |m| {
            m.text = Some(update.text.clone()).filter(|t| !t.is_empty());
            m.edited = true;
        })
    }

    async fn delete_message(&self, id: &str) -> Result<Message, ClientError> {
        self.calls.lock().push(Call::Delete(id.to_string()));

        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(ClientError::Status {
                status: 500,
                message: "Internal server error".to_string(),
            });
        }

        self.modify(id, |m| {
            m.deleted = true;
            m.text = None;
            m.image = None;
        })
    }

    async fn live_feed(&self) -> Result<LiveFeed, ClientError> {
        self.live_feed_calls.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel(16);
        self.feeds.lock().push(tx);
        Ok(rx)
    }
}

/// Poll `condition` until it holds or a second passes.
pub async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
