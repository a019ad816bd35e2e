//! Chat session orchestration.
//!
//! Drives one focused conversation at a time on top of the REST API and the
//! socket manager: history loading, optimistic sends with reconciliation,
//! inbound routing with duplicate suppression, and unread counters for
//! background threads.

use crate::market::socket::{ChatSocketManager, FrameHandler, SocketListener};
use crate::market::thread::api::ThreadApi;
use crate::market::thread::listener::{EmptyThreadListener, ThreadListener};
use crate::market::thread::models::{ChatMessage, ChatThread};
use crate::market::types::{ChatFrame, OutboundFrame, SenderType};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// History page requested when a thread is opened.
const HISTORY_PAGE_SIZE: usize = 50;

/// Session state machine, from the consuming application's viewpoint.
///
/// `NoThread -> Loading -> Ready(connected|disconnected)`; selecting a
/// different thread resets to `Loading`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    NoThread,
    Loading,
    Ready { connected: bool },
}

/// Ordered message list for the focused thread, with duplicate suppression
/// by message id and optimistic-send bookkeeping.
#[derive(Default)]
pub struct Timeline {
    messages: Vec<ChatMessage>,
    seen: HashSet<String>,
}

impl Timeline {
    /// Replace the timeline with a freshly loaded history page.
    pub fn reset(&mut self, history: Vec<ChatMessage>) {
        self.seen = history.iter().map(|m| m.id.clone()).collect();
        self.messages = history;
    }

    /// Append an inbound message unless its id was already seen.
    /// Returns `true` when the message was accepted.
    pub fn apply_incoming(&mut self, message: ChatMessage) -> bool {
        if !self.seen.insert(message.id.clone()) {
            return false;
        }
        self.messages.push(message);
        true
    }

    /// Insert a not-yet-confirmed local message.
    pub fn insert_optimistic(&mut self, message: ChatMessage) {
        self.seen.insert(message.id.clone());
        self.messages.push(message);
    }

    /// Replace the optimistic message `local_id` with the server copy,
    /// keeping its position. A socket echo of the server copy arriving later
    /// is then suppressed as a duplicate.
    pub fn reconcile(&mut self, local_id: &str, server: ChatMessage) {
        self.seen.remove(local_id);
        self.seen.insert(server.id.clone());
        if let Some(slot) = self.messages.iter_mut().find(|m| m.id == local_id) {
            *slot = server;
        } else if !self.messages.iter().any(|m| m.id == server.id) {
            self.messages.push(server);
        }
    }

    /// Remove a failed optimistic message; returns it so the caller can
    /// restore the draft text.
    pub fn rollback(&mut self, local_id: &str) -> Option<ChatMessage> {
        self.seen.remove(local_id);
        let idx = self.messages.iter().position(|m| m.id == local_id)?;
        Some(self.messages.remove(idx))
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }
}

struct SessionData {
    state: SessionState,
    focused: Option<String>,
    timeline: Timeline,
    unread: HashMap<String, i64>,
    handlers: HashMap<String, crate::market::socket::HandlerId>,
}

struct SessionInner {
    api: Arc<ThreadApi>,
    sockets: ChatSocketManager,
    listener: Arc<dyn ThreadListener>,
    data: Mutex<SessionData>,
}

/// One chat session per local user. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct ThreadSession {
    inner: Arc<SessionInner>,
}

impl ThreadSession {
    pub fn new(
        api: Arc<ThreadApi>,
        sockets: ChatSocketManager,
        listener: Arc<dyn ThreadListener>,
    ) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                api,
                sockets,
                listener,
                data: Mutex::new(SessionData {
                    state: SessionState::NoThread,
                    focused: None,
                    timeline: Timeline::default(),
                    unread: HashMap::new(),
                    handlers: HashMap::new(),
                }),
            }),
        }
    }

    pub fn with_empty_listener(api: Arc<ThreadApi>, sockets: ChatSocketManager) -> Self {
        Self::new(api, sockets, Arc::new(EmptyThreadListener))
    }

    pub fn state(&self) -> SessionState {
        self.inner.data.lock().unwrap().state
    }

    pub fn focused_thread(&self) -> Option<String> {
        self.inner.data.lock().unwrap().focused.clone()
    }

    /// Snapshot of the focused thread's timeline.
    pub fn messages(&self) -> Vec<ChatMessage> {
        self.inner.data.lock().unwrap().timeline.messages().to_vec()
    }

    /// Locally tracked unread counter for a background thread.
    pub fn unread_count(&self, thread_id: &str) -> i64 {
        self.inner
            .data
            .lock()
            .unwrap()
            .unread
            .get(thread_id)
            .copied()
            .unwrap_or(0)
    }

    pub async fn list_threads(&self) -> Result<Vec<ChatThread>> {
        self.inner.api.list_threads().await
    }

    /// Select a thread: load one history page, mark it read, wire the frame
    /// router, and open (or reuse) the socket. Returns the loaded history.
    ///
    /// A previously focused thread keeps its channel and router so its
    /// unread counter continues to track in the background.
    pub async fn open_thread(&self, thread_id: &str) -> Result<Vec<ChatMessage>> {
        self.transition(SessionState::Loading).await;

        let history = match self
            .inner
            .api
            .get_messages(thread_id, 0, HISTORY_PAGE_SIZE)
            .await
        {
            Ok(history) => history,
            Err(e) => {
                self.transition(SessionState::NoThread).await;
                return Err(e).context("failed to load thread history");
            }
        };
        if let Err(e) = self.inner.api.mark_read(thread_id).await {
            warn!("[Session] mark read for thread {} failed: {}", thread_id, e);
        }

        {
            let mut data = self.inner.data.lock().unwrap();
            data.focused = Some(thread_id.to_string());
            data.timeline.reset(history.clone());
            data.unread.insert(thread_id.to_string(), 0);
            if !data.handlers.contains_key(thread_id) {
                let router = Arc::new(FrameRouter {
                    inner: self.inner.clone(),
                });
                let id = self.inner.sockets.add_frame_handler(thread_id, router);
                data.handlers.insert(thread_id.to_string(), id);
            }
        }

        self.inner.sockets.connect(
            thread_id,
            self.inner.api.user_id(),
            self.inner.api.user_type(),
            Arc::new(StatusRelay {
                inner: self.inner.clone(),
            }),
        );

        let connected = self.inner.sockets.is_connected(thread_id);
        self.transition(SessionState::Ready { connected }).await;
        info!(
            "[Session] 📖 thread {} opened, {} messages loaded",
            thread_id,
            history.len()
        );
        Ok(history)
    }

    /// Send a message on the focused thread.
    ///
    /// The message is inserted locally first (client UUID), pushed over the
    /// socket best-effort, then persisted via REST. On success the server
    /// copy replaces the optimistic one; on failure it is rolled back and
    /// the draft is handed to `on_send_failed`.
    pub async fn send_message(&self, text: &str) -> Result<ChatMessage> {
        let thread_id = self
            .focused_thread()
            .ok_or_else(|| anyhow::anyhow!("no thread selected"))?;

        let new_message = self.inner.api.new_local_message(&thread_id, text);
        let local = ChatMessage {
            id: new_message.id.clone(),
            thread_id: thread_id.clone(),
            sender_id: new_message.sender_id.clone(),
            sender_type: new_message.sender_type,
            message: text.to_string(),
            created_at: Utc::now(),
            is_read_by_buyer: new_message.sender_type == SenderType::Buyer,
            is_read_by_seller: new_message.sender_type == SenderType::Seller,
        };
        {
            let mut data = self.inner.data.lock().unwrap();
            data.timeline.insert_optimistic(local.clone());
        }
        self.inner.listener.on_message(local.clone()).await;

        // Best-effort realtime push; the REST call below is authoritative
        // and the boolean result is deliberately ignored.
        let _ = self
            .inner
            .sockets
            .send_frame(
                &thread_id,
                &OutboundFrame::Message {
                    message: text.to_string(),
                },
            )
            .await;

        match self.inner.api.send_message(&new_message).await {
            Ok(server) => {
                let mut data = self.inner.data.lock().unwrap();
                data.timeline.reconcile(&local.id, server.clone());
                Ok(server)
            }
            Err(e) => {
                {
                    let mut data = self.inner.data.lock().unwrap();
                    data.timeline.rollback(&local.id);
                }
                warn!(
                    "[Session] ❌ send on thread {} failed, rolling back: {}",
                    thread_id, e
                );
                self.inner
                    .listener
                    .on_send_failed(local.id.clone(), text.to_string())
                    .await;
                Err(e)
            }
        }
    }

    /// First message toward a seller: reuse the existing thread when one is
    /// listed, otherwise create it lazily, then open it and send.
    pub async fn send_to_seller(&self, seller_id: &str, text: &str) -> Result<ChatMessage> {
        let existing = self
            .list_threads()
            .await?
            .into_iter()
            .find(|t| t.seller_id == seller_id);
        let thread = match existing {
            Some(thread) => thread,
            None => self.inner.api.start_thread(seller_id).await?,
        };
        if self.focused_thread().as_deref() != Some(thread.id.as_str()) {
            self.open_thread(&thread.id).await?;
        }
        self.send_message(text).await
    }

    /// Typing indicator for the focused thread; silently dropped while
    /// disconnected.
    pub async fn send_typing(&self, typing: bool) -> bool {
        let Some(thread_id) = self.focused_thread() else {
            return false;
        };
        let frame = if typing {
            OutboundFrame::Typing
        } else {
            OutboundFrame::StopTyping
        };
        self.inner.sockets.send_frame(&thread_id, &frame).await
    }

    /// Close the focused thread's channel and reset to `NoThread`.
    pub async fn close(&self) {
        let focused = {
            let mut data = self.inner.data.lock().unwrap();
            data.timeline = Timeline::default();
            let focused = data.focused.take();
            if let Some(thread_id) = &focused {
                data.handlers.remove(thread_id);
            }
            focused
        };
        if let Some(thread_id) = focused {
            self.inner.sockets.disconnect(&thread_id).await;
        }
        self.transition(SessionState::NoThread).await;
    }

    async fn transition(&self, state: SessionState) {
        {
            let mut data = self.inner.data.lock().unwrap();
            if data.state == state {
                return;
            }
            data.state = state;
        }
        debug!("[Session] state -> {:?}", state);
        self.inner.listener.on_state_changed(state).await;
    }
}

/// Routes inbound frames into the session: duplicate suppression, echo
/// filtering, unread counting for background threads.
struct FrameRouter {
    inner: Arc<SessionInner>,
}

#[async_trait]
impl FrameHandler for FrameRouter {
    async fn on_frame(&self, thread_id: &str, frame: &ChatFrame) {
        let self_id = self.inner.api.user_id();
        match frame {
            ChatFrame::Message { sender_id, .. } => {
                if sender_id.as_deref() == Some(self_id) {
                    debug!("[Session] ignoring self echo on thread {}", thread_id);
                    return;
                }
                let Some(message) = ChatMessage::from_frame(thread_id, frame) else {
                    return;
                };
                enum Routed {
                    Focused(ChatMessage),
                    Duplicate,
                    Background(i64),
                }
                let routed = {
                    let mut data = self.inner.data.lock().unwrap();
                    if data.focused.as_deref() == Some(thread_id) {
                        if data.timeline.apply_incoming(message.clone()) {
                            Routed::Focused(message)
                        } else {
                            Routed::Duplicate
                        }
                    } else {
                        let counter = data.unread.entry(thread_id.to_string()).or_insert(0);
                        *counter += 1;
                        Routed::Background(*counter)
                    }
                };
                match routed {
                    Routed::Focused(message) => {
                        self.inner.listener.on_message(message).await;
                        // The user is looking at this thread; mark it read in
                        // the background and only log failures.
                        let api = self.inner.api.clone();
                        let tid = thread_id.to_string();
                        tokio::spawn(async move {
                            if let Err(e) = api.mark_read(&tid).await {
                                warn!("[Session] background mark read failed: {}", e);
                            }
                        });
                    }
                    Routed::Duplicate => {
                        debug!("[Session] duplicate message on thread {}", thread_id);
                    }
                    Routed::Background(count) => {
                        self.inner
                            .listener
                            .on_thread_updated(thread_id.to_string(), count)
                            .await;
                    }
                }
            }
            ChatFrame::Typing { user_id } | ChatFrame::StopTyping { user_id } => {
                let Some(user_id) = user_id.clone() else {
                    return;
                };
                if user_id == self_id {
                    return;
                }
                let typing = matches!(frame, ChatFrame::Typing { .. });
                self.inner
                    .listener
                    .on_typing(thread_id.to_string(), user_id, typing)
                    .await;
            }
            ChatFrame::UserJoined { user_id } | ChatFrame::UserLeft { user_id } => {
                let Some(user_id) = user_id.clone() else {
                    return;
                };
                let joined = matches!(frame, ChatFrame::UserJoined { .. });
                self.inner
                    .listener
                    .on_presence(thread_id.to_string(), user_id, joined)
                    .await;
            }
            ChatFrame::Ping | ChatFrame::Pong => {}
        }
    }
}

/// Forwards socket status flips into the session state machine.
struct StatusRelay {
    inner: Arc<SessionInner>,
}

#[async_trait]
impl SocketListener for StatusRelay {
    async fn on_status_changed(&self, thread_id: &str, connected: bool) {
        let state = {
            let mut data = self.inner.data.lock().unwrap();
            if data.focused.as_deref() != Some(thread_id) {
                return;
            }
            let state = SessionState::Ready { connected };
            if data.state == state {
                return;
            }
            data.state = state;
            state
        };
        self.inner.listener.on_state_changed(state).await;
    }
}
