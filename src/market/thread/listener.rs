//! Chat session callback interface.

use crate::market::thread::models::ChatMessage;
use crate::market::thread::service::SessionState;
use async_trait::async_trait;

/// Callbacks for everything the chat session observes: state transitions,
/// accepted inbound messages, unread counters for background threads,
/// typing/presence, and failed optimistic sends.
#[async_trait]
pub trait ThreadListener: Send + Sync {
    /// Session state machine transition (`NoThread`/`Loading`/`Ready`).
    async fn on_state_changed(&self, state: SessionState);

    /// A message was accepted into the focused thread's timeline.
    async fn on_message(&self, message: ChatMessage);

    /// Unread counter changed for a thread that is not currently focused.
    async fn on_thread_updated(&self, thread_id: String, unread_count: i64);

    /// The peer started (`true`) or stopped (`false`) typing.
    async fn on_typing(&self, thread_id: String, user_id: String, typing: bool);

    /// The peer joined (`true`) or left (`false`) the thread's channel.
    async fn on_presence(&self, thread_id: String, user_id: String, joined: bool);

    /// An optimistic send was rolled back; `draft` is the text to restore.
    async fn on_send_failed(&self, local_id: String, draft: String);
}

/// Default no-op listener.
pub struct EmptyThreadListener;

#[async_trait]
impl ThreadListener for EmptyThreadListener {
    async fn on_state_changed(&self, _state: SessionState) {}
    async fn on_message(&self, _message: ChatMessage) {}
    async fn on_thread_updated(&self, _thread_id: String, _unread_count: i64) {}
    async fn on_typing(&self, _thread_id: String, _user_id: String, _typing: bool) {}
    async fn on_presence(&self, _thread_id: String, _user_id: String, _joined: bool) {}
    async fn on_send_failed(&self, _local_id: String, _draft: String) {}
}
