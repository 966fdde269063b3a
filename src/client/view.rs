use std::collections::HashSet;
use std::future::Future;

use chrono::{Local, TimeZone};

use crate::client::api::{ChatApi, MessageUpdate, NewMessage};
use crate::client::error::ClientError;
use crate::client::store::{ChatStore, FetchOutcome};
use crate::db::{Message, User};

pub const DEFAULT_AVATAR: &str = "/avatar.png";
pub const DELETED_PLACEHOLDER: &str = "This message was deleted";
pub const SKELETON_ROWS: usize = 6;

/// How a user action ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionOutcome {
    Applied,
    /// Nothing was sent: the action was not allowed or had nothing to commit.
    Ignored,
    /// The request failed. The error was logged and local state left as it was.
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditSession {
    pub message_id: String,
    pub draft: String,
    focus_requested: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// Someone else's message.
    Start,
    /// Our own message.
    End,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowBody {
    Text(String),
    Deleted,
    Editing { draft: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    pub id: String,
    pub side: Side,
    pub avatar: String,
    pub time: String,
    pub image: Option<String>,
    pub body: RowBody,
    pub edited: bool,
    /// Edit and delete buttons.
    pub controls: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub peer_id: String,
    pub full_name: String,
    pub avatar: String,
    pub online: bool,
}

/// Everything needed to draw the chat pane. Loading and Ready both keep the
/// header and the message input on screen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    NoChatSelected,
    Loading { header: Header, skeleton_rows: usize },
    Ready { header: Header, rows: Vec<Row> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrollRequest {
    pub message_id: String,
    pub smooth: bool,
}

pub fn format_message_time(created_at_millis: i64) -> String {
    match Local.timestamp_millis_opt(created_at_millis).single() {
        Some(time) => time.format("%H:%M").to_string(),
        None => String::new(),
    }
}

fn avatar_or_default(profile_pic: &str) -> String {
    if profile_pic.is_empty() {
        DEFAULT_AVATAR.to_string()
    } else {
        profile_pic.to_string()
    }
}

/// Headless chat pane for one conversation.
///
/// Keeps a single edit slot and the ids deleted from this view. A row counts
/// as deleted when the server flag is set or its id is in that set.
pub struct ChatView<A: ChatApi> {
    store: ChatStore<A>,
    auth_user: User,
    peer: Option<User>,
    edit: Option<EditSession>,
    local_deleted: HashSet<String>,
    seen_revision: Option<u64>,
    subscribed: bool,
}

impl<A: ChatApi> ChatView<A> {
    pub fn new(store: ChatStore<A>, auth_user: User) -> Self {
        Self {
            store,
            auth_user,
            peer: None,
            edit: None,
            local_deleted: HashSet::new(),
            seen_revision: None,
            subscribed: false,
        }
    }

    pub fn store(&self) -> &ChatStore<A> {
        &self.store
    }

    pub fn editing(&self) -> Option<&EditSession> {
        self.edit.as_ref()
    }

    pub fn local_deleted(&self) -> &HashSet<String> {
        &self.local_deleted
    }

    /// Open the conversation with `peer`: select it in the store, renew the
    /// live subscription, and return the history fetch for the caller to drive.
    pub fn select_peer(
        &mut self,
        peer: User,
    ) -> impl Future<Output = Result<FetchOutcome, ClientError>> + Send + 'static {
        let peer_id = peer.id.clone();

        if self.peer.as_ref().map(|p| p.id.as_str()) != Some(peer_id.as_str()) {
            // The edited row belongs to the old conversation
            self.edit = None;
        }

        self.store.unsubscribe_from_messages();
        self.store.select_user(Some(peer.clone()));
        self.peer = Some(peer);
        self.store.subscribe_to_messages();
        self.subscribed = true;

        // Loading must show from the click, not from the first poll
        let generation = self.store.begin_fetch();
        let store = self.store.clone();
        async move { store.complete_fetch(&peer_id, generation).await }
    }

    /// Stop live updates for this view. Safe to call more than once.
    pub fn unmount(&mut self) {
        if self.subscribed {
            self.store.unsubscribe_from_messages();
            self.subscribed = false;
        }
    }

    fn is_own(&self, message: &Message) -> bool {
        message.sender_id == self.auth_user.id
    }

    pub fn is_deleted(&self, message: &Message) -> bool {
        message.deleted || self.local_deleted.contains(&message.id)
    }

    fn can_modify(&self, message: &Message) -> bool {
        self.is_own(message) && !self.is_deleted(message)
    }

    /// Enter edit mode on `message_id`, taking over the single edit slot.
    pub fn begin_edit(&mut self, message_id: &str) -> ActionOutcome {
        let Some(message) = self.store.message(message_id) else {
            return ActionOutcome::Ignored;
        };
        if !self.can_modify(&message) {
            return ActionOutcome::Ignored;
        }

        self.edit = Some(EditSession {
            message_id: message.id,
            draft: message.text.unwrap_or_default(),
            focus_requested: true,
        });
        ActionOutcome::Applied
    }

    pub fn set_draft(&mut self, text: impl Into<String>) {
        if let Some(session) = self.edit.as_mut() {
            session.draft = text.into();
        }
    }

    /// The row whose input should grab focus, reported once per edit.
    pub fn take_focus_request(&mut self) -> Option<String> {
        let session = self.edit.as_mut()?;
        if !session.focus_requested {
            return None;
        }
        session.focus_requested = false;
        Some(session.message_id.clone())
    }

    pub fn cancel_edit(&mut self) {
        self.edit = None;
    }

    /// Commit the draft. An empty draft on a message without an image is
    /// ignored and leaves the session open.
    pub async fn save_edit(&mut self) -> ActionOutcome {
        let Some(session) = self.edit.as_ref() else {
            return ActionOutcome::Ignored;
        };

        let message_id = session.message_id.clone();
        let trimmed = session.draft.trim().to_string();
        let has_image = self
            .store
            .message(&message_id)
            .is_some_and(|m| m.has_image());

        if trimmed.is_empty() && !has_image {
            return ActionOutcome::Ignored;
        }

        match self
            .store
            .update_message(&message_id, MessageUpdate { text: trimmed })
            .await
        {
            Ok(_) => {
                self.edit = None;
                ActionOutcome::Applied
            }
            Err(e) => {
                tracing::error!(%message_id, "Failed to update message: {}", e);
                ActionOutcome::Failed
            }
        }
    }

    /// Delete one of our own messages and show it as deleted right away.
    pub async fn delete(&mut self, message_id: &str) -> ActionOutcome {
        match self.store.message(message_id) {
            Some(message) if self.is_own(&message) => {}
            _ => return ActionOutcome::Ignored,
        }

        match self.store.delete_message(message_id).await {
            Ok(_) => {
                self.local_deleted.insert(message_id.to_string());
                if self.edit.as_ref().is_some_and(|s| s.message_id == message_id) {
                    self.cancel_edit();
                }
                ActionOutcome::Applied
            }
            Err(e) => {
                tracing::error!(%message_id, "Failed to delete message: {}", e);
                ActionOutcome::Failed
            }
        }
    }

    /// Send a new message to the selected peer.
    pub async fn send(&mut self, text: &str, image: Option<String>) -> ActionOutcome {
        let text = text.trim();
        let image = image.filter(|i| !i.is_empty());
        if text.is_empty() && image.is_none() {
            return ActionOutcome::Ignored;
        }

        let message = NewMessage {
            text: (!text.is_empty()).then(|| text.to_string()),
            image,
        };
        match self.store.send_message(message).await {
            Ok(_) => ActionOutcome::Applied,
            Err(e) => {
                tracing::error!("Failed to send message: {}", e);
                ActionOutcome::Failed
            }
        }
    }

    fn header(&self, peer: &User) -> Header {
        Header {
            peer_id: peer.id.clone(),
            full_name: peer.full_name.clone(),
            avatar: avatar_or_default(&peer.profile_pic),
            online: self.store.is_online(&peer.id),
        }
    }

    fn row(&self, message: &Message, peer: &User) -> Row {
        let own = self.is_own(message);
        let deleted = self.is_deleted(message);
        let editing = self
            .edit
            .as_ref()
            .filter(|s| s.message_id == message.id);

        let body = match editing {
            _ if deleted => RowBody::Deleted,
            Some(session) => RowBody::Editing { draft: session.draft.clone() },
            None => RowBody::Text(message.text.clone().unwrap_or_default()),
        };

        Row {
            id: message.id.clone(),
            side: if own { Side::End } else { Side::Start },
            avatar: if own {
                avatar_or_default(&self.auth_user.profile_pic)
            } else {
                avatar_or_default(&peer.profile_pic)
            },
            time: format_message_time(message.created_at),
            image: if deleted { None } else { message.image.clone().filter(|i| !i.is_empty()) },
            body,
            edited: message.edited && !deleted,
            controls: own && !deleted,
        }
    }

    pub fn render(&self) -> Frame {
        let Some(peer) = self.peer.as_ref() else {
            return Frame::NoChatSelected;
        };

        let header = self.header(peer);
        if self.store.is_messages_loading() {
            return Frame::Loading {
                header,
                skeleton_rows: SKELETON_ROWS,
            };
        }

        let rows = self
            .store
            .messages()
            .iter()
            .map(|m| self.row(m, peer))
            .collect();
        Frame::Ready { header, rows }
    }

    /// After the message list changed, ask for the newest message to be scrolled into view.
    pub fn take_scroll_request(&mut self) -> Option<ScrollRequest> {
        if self.peer.is_none() || self.store.is_messages_loading() {
            return None;
        }

        let revision = self.store.revision();
        if self.seen_revision == Some(revision) {
            return None;
        }
        self.seen_revision = Some(revision);

        self.store.messages().last().map(|m| ScrollRequest {
            message_id: m.id.clone(),
            smooth: true,
        })
    }
}

impl<A: ChatApi> Drop for ChatView<A> {
    fn drop(&mut self) {
        self.unmount();
    }
}
