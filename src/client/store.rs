use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;

use crate::client::api::{ChatApi, MessageUpdate, NewMessage};
use crate::client::error::ClientError;
use crate::db::{Message, User};
use crate::live::LiveEvent;

/// What changed, delivered to every registered listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    UsersChanged,
    SelectionChanged,
    LoadingChanged(bool),
    MessagesChanged { revision: u64 },
    OnlineUsersChanged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

type Listener = Arc<dyn Fn(&StoreEvent) + Send + Sync>;

/// Result of a history fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    Loaded(usize),
    /// A newer fetch started, or the peer was deselected, before this one resolved.
    Stale,
}

#[derive(Debug, Clone, Default)]
pub struct StoreState {
    pub users: Vec<User>,
    pub is_users_loading: bool,
    pub selected_user: Option<User>,
    pub messages: Vec<Message>,
    pub is_messages_loading: bool,
    pub online_users: Vec<String>,
    /// Bumped whenever `messages` changes.
    pub revision: u64,
    generation: u64,
}

impl StoreState {
    fn selected_id(&self) -> Option<&str> {
        self.selected_user.as_ref().map(|u| u.id.as_str())
    }

    fn replace_message(&mut self, message: Message) -> bool {
        match self.messages.iter_mut().find(|m| m.id == message.id) {
            Some(slot) => {
                *slot = message;
                self.revision += 1;
                true
            }
            None => false,
        }
    }

    fn push_message(&mut self, message: Message) -> bool {
        if self.messages.iter().any(|m| m.id == message.id) {
            return false;
        }
        self.messages.push(message);
        self.revision += 1;
        true
    }
}

/// Message list, sidebar users and online roster for one session. The only
/// caller of the `ChatApi`; the state lock is never held across an `.await`.
pub struct ChatStore<A: ChatApi> {
    api: Arc<A>,
    state: Arc<Mutex<StoreState>>,
    listeners: Arc<Mutex<BTreeMap<ListenerId, Listener>>>,
    next_listener: Arc<AtomicU64>,
    subscription: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl<A: ChatApi> Clone for ChatStore<A> {
    fn clone(&self) -> Self {
        Self {
            api: self.api.clone(),
            state: self.state.clone(),
            listeners: self.listeners.clone(),
            next_listener: self.next_listener.clone(),
            subscription: self.subscription.clone(),
        }
    }
}

impl<A: ChatApi> ChatStore<A> {
    pub fn new(api: Arc<A>) -> Self {
        Self {
            api,
            state: Arc::new(Mutex::new(StoreState::default())),
            listeners: Arc::new(Mutex::new(BTreeMap::new())),
            next_listener: Arc::new(AtomicU64::new(1)),
            subscription: Arc::new(Mutex::new(None)),
        }
    }

    pub fn api(&self) -> &Arc<A> {
        &self.api
    }

    pub fn snapshot(&self) -> StoreState {
        self.state.lock().clone()
    }

    pub fn messages(&self) -> Vec<Message> {
        self.state.lock().messages.clone()
    }

    pub fn message(&self, id: &str) -> Option<Message> {
        self.state.lock().messages.iter().find(|m| m.id == id).cloned()
    }

    pub fn is_messages_loading(&self) -> bool {
        self.state.lock().is_messages_loading
    }

    pub fn revision(&self) -> u64 {
        self.state.lock().revision
    }

    pub fn selected_user(&self) -> Option<User> {
        self.state.lock().selected_user.clone()
    }

    pub fn is_online(&self, user_id: &str) -> bool {
        self.state.lock().online_users.iter().any(|id| id == user_id)
    }

    pub fn add_listener(&self, listener: impl Fn(&StoreEvent) + Send + Sync + 'static) -> ListenerId {
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed));
        self.listeners.lock().insert(id, Arc::new(listener));
        id
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.listeners.lock().remove(&id).is_some()
    }

    fn notify(&self, events: &[StoreEvent]) {
        if events.is_empty() {
            return;
        }
        // Call outside the lock so listeners may use the store
        let listeners: Vec<Listener> = self.listeners.lock().values().cloned().collect();
        for event in events {
            for listener in &listeners {
                listener(event);
            }
        }
    }

    pub async fn get_users(&self) -> Result<Vec<User>, ClientError> {
        self.state.lock().is_users_loading = true;

        let result = self.api.get_users().await;

        {
            let mut state = self.state.lock();
            state.is_users_loading = false;
            if let Ok(users) = &result {
                state.users = users.clone();
            }
        }
        if result.is_ok() {
            self.notify(&[StoreEvent::UsersChanged]);
        }
        result
    }

    /// Select the peer whose conversation the store tracks. Changing peers clears
    /// the message list and invalidates any fetch in flight.
    pub fn select_user(&self, user: Option<User>) {
        let events = {
            let mut state = self.state.lock();
            let changed = state.selected_id() != user.as_ref().map(|u| u.id.as_str());
            state.selected_user = user;
            if !changed {
                return;
            }

            state.generation += 1;
            state.is_messages_loading = false;
            state.messages.clear();
            state.revision += 1;
            vec![
                StoreEvent::SelectionChanged,
                StoreEvent::MessagesChanged { revision: state.revision },
            ]
        };
        self.notify(&events);
    }

    /// Fetch history with `peer_id` and replace the message list with it.
    ///
    /// The result is applied only if no newer fetch started and `peer_id` is
    /// still the selected peer when it resolves; otherwise it is discarded.
    pub async fn get_messages(&self, peer_id: &str) -> Result<FetchOutcome, ClientError> {
        let generation = self.begin_fetch();
        self.complete_fetch(peer_id, generation).await
    }

    /// Mark a history fetch as started and return its generation. The loading
    /// flag is visible to readers before anything is awaited.
    pub fn begin_fetch(&self) -> u64 {
        let generation = {
            let mut state = self.state.lock();
            state.generation += 1;
            state.is_messages_loading = true;
            state.generation
        };
        self.notify(&[StoreEvent::LoadingChanged(true)]);
        generation
    }

    /// Run the fetch started by `begin_fetch` and apply it if still current.
    pub async fn complete_fetch(&self, peer_id: &str, generation: u64) -> Result<FetchOutcome, ClientError> {
        let result = self.api.get_messages(peer_id).await;

        let (outcome, events) = {
            let mut state = self.state.lock();
            if state.generation != generation {
                // A newer fetch owns the loading flag
                tracing::debug!(peer_id, "discarding stale message fetch");
                return Ok(FetchOutcome::Stale);
            }

            state.is_messages_loading = false;
            let mut events = vec![StoreEvent::LoadingChanged(false)];
            if state.selected_id() != Some(peer_id) {
                tracing::debug!(peer_id, "discarding fetch for unselected peer");
                (Ok(FetchOutcome::Stale), events)
            } else {
                let outcome = result.map(|messages| {
                    let count = messages.len();
                    state.messages = messages;
                    state.revision += 1;
                    events.push(StoreEvent::MessagesChanged { revision: state.revision });
                    FetchOutcome::Loaded(count)
                });
                (outcome, events)
            }
        };
        self.notify(&events);

        if let Err(e) = &outcome {
            tracing::error!(peer_id, "Failed to load messages: {}", e);
        }
        outcome
    }

    pub async fn send_message(&self, message: NewMessage) -> Result<Message, ClientError> {
        let peer_id = self
            .state
            .lock()
            .selected_id()
            .map(str::to_string)
            .ok_or(ClientError::NoPeerSelected)?;

        let sent = self.api.send_message(&peer_id, &message).await?;

        let revision = {
            let mut state = self.state.lock();
            (state.selected_id() == Some(peer_id.as_str()) && state.push_message(sent.clone()))
                .then_some(state.revision)
        };
        if let Some(revision) = revision {
            self.notify(&[StoreEvent::MessagesChanged { revision }]);
        }
        Ok(sent)
    }

    /// Resolves once the server confirmed the edit; the list then holds the server copy.
    pub async fn update_message(&self, id: &str, update: MessageUpdate) -> Result<Message, ClientError> {
        let updated = self.api.update_message(id, &update).await?;
        self.apply_server_copy(updated.clone());
        Ok(updated)
    }

    /// Resolves once the server confirmed the delete; the list then holds the tombstone.
    pub async fn delete_message(&self, id: &str) -> Result<Message, ClientError> {
        let deleted = self.api.delete_message(id).await?;
        self.apply_server_copy(deleted.clone());
        Ok(deleted)
    }

    fn apply_server_copy(&self, message: Message) {
        let revision = {
            let mut state = self.state.lock();
            state.replace_message(message).then_some(state.revision)
        };
        if let Some(revision) = revision {
            self.notify(&[StoreEvent::MessagesChanged { revision }]);
        }
    }

    /// Fold one live event into the store.
    pub async fn apply_live_event(&self, event: LiveEvent) {
        if let LiveEvent::EventsMissed { count } = event {
            tracing::warn!(count, "live feed lagged, refetching");
            let peer = self.state.lock().selected_id().map(str::to_string);
            if let Some(peer) = peer {
                let _ = self.get_messages(&peer).await;
            }
            return;
        }

        let events = {
            let mut state = self.state.lock();
            match event {
                LiveEvent::NewMessage { message } => {
                    // Own messages arrive through send_message
                    let from_peer = state.selected_id() == Some(message.sender_id.as_str());
                    if from_peer && state.push_message(message) {
                        vec![StoreEvent::MessagesChanged { revision: state.revision }]
                    } else {
                        Vec::new()
                    }
                }
                LiveEvent::MessageUpdated { message } | LiveEvent::MessageDeleted { message } => {
                    if state.replace_message(message) {
                        vec![StoreEvent::MessagesChanged { revision: state.revision }]
                    } else {
                        Vec::new()
                    }
                }
                LiveEvent::OnlineUsers { user_ids } => {
                    state.online_users = user_ids;
                    vec![StoreEvent::OnlineUsersChanged]
                }
                LiveEvent::EventsMissed { .. } => Vec::new(),
            }
        };
        self.notify(&events);
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscription
            .lock()
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Start forwarding live events into the store. Calling it while already
    /// subscribed does nothing, so events are never delivered twice.
    pub fn subscribe_to_messages(&self) {
        let mut subscription = self.subscription.lock();
        if subscription.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }

        let store = self.clone();
        *subscription = Some(tokio::spawn(async move {
            let mut feed = match store.api.live_feed().await {
                Ok(feed) => feed,
                Err(e) => {
                    tracing::error!("Failed to open live feed: {}", e);
                    return;
                }
            };
            while let Some(event) = feed.recv().await {
                store.apply_live_event(event).await;
            }
            tracing::debug!("live feed ended");
        }));
    }

    /// Stop forwarding live events. No-op when not subscribed.
    pub fn unsubscribe_from_messages(&self) {
        if let Some(task) = self.subscription.lock().take() {
            task.abort();
        }
    }

    /// Tear the store down: no more live events, no more listeners.
    pub fn shutdown(&self) {
        self.unsubscribe_from_messages();
        self.listeners.lock().clear();
    }
}
