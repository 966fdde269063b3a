pub mod api;
pub mod error;
pub mod store;
pub mod view;

#[cfg(test)]
pub(crate) mod mock;

pub use api::{ChatApi, HttpChatApi, LiveFeed, MessageUpdate, NewMessage};
pub use error::ClientError;
pub use store::{ChatStore, FetchOutcome, StoreEvent};
pub use view::{ActionOutcome, ChatView, Frame, Row, RowBody, Side};
