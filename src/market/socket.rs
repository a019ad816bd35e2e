//! Per-thread WebSocket channel manager.
//!
//! Maintains at most one live socket per chat thread, with automatic
//! recovery (bounded exponential backoff), a periodic heartbeat, and
//! fan-out of inbound frames to any number of registered handlers.

use crate::market::types::{ChatFrame, OutboundFrame, SenderType};
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

/// WebSocket write half type alias.
pub type WsWriter = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, WsMessage>;

/// WebSocket read half type alias.
pub type WsReader = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Socket manager configuration.
#[derive(Clone, Debug)]
pub struct SocketConfig {
    /// WebSocket base URL, e.g. `ws://localhost:8000`.
    pub ws_base_url: String,
    /// Keep-alive ping cadence while a socket is open.
    pub heartbeat_interval: Duration,
    /// Base delay for the reconnect backoff (doubled per attempt, no cap).
    pub reconnect_base_delay: Duration,
    /// Failed dials tolerated before the thread is left disconnected.
    pub max_reconnect_attempts: u32,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            ws_base_url: "ws://localhost:8000".to_string(),
            heartbeat_interval: Duration::from_secs(30),
            reconnect_base_delay: Duration::from_millis(3000),
            max_reconnect_attempts: 5,
        }
    }
}

impl SocketConfig {
    /// Backoff delay before reconnect attempt `attempt` (1-based):
    /// `base * 2^(attempt-1)`. No jitter, no ceiling; the attempt limit is
    /// the only bound.
    pub fn reconnect_delay(&self, attempt: u32) -> Duration {
        self.reconnect_base_delay * 2u32.pow(attempt.saturating_sub(1))
    }
}

/// Lifecycle of one per-thread channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketState {
    Idle,
    Connecting,
    Open,
    Reconnecting,
    Closed,
}

/// Identifier returned by [`ChatSocketManager::add_frame_handler`], used to
/// remove the handler again.
pub type HandlerId = u64;

/// Receives every inbound frame on a thread's socket.
///
/// Multiple independent handlers may be registered per thread (thread list
/// and active chat view, for example). Delivery is sequential per socket, in
/// transport arrival order.
#[async_trait]
pub trait FrameHandler: Send + Sync {
    async fn on_frame(&self, thread_id: &str, frame: &ChatFrame);
}

/// Connection status callbacks for one thread's channel.
#[async_trait]
pub trait SocketListener: Send + Sync {
    /// `connected` flips to `true` on every successful open and to `false`
    /// on transport errors and non-deliberate closes.
    async fn on_status_changed(&self, thread_id: &str, connected: bool);
}

/// Default no-op listener.
pub struct EmptySocketListener;

#[async_trait]
impl SocketListener for EmptySocketListener {
    async fn on_status_changed(&self, _thread_id: &str, _connected: bool) {}
}

/// How a socket's read side ended.
enum StreamEnd {
    /// Deliberate close (code 1000/1001). No reconnect.
    Normal,
    /// Anything else: transport error, dial failure, abrupt drop.
    Abnormal,
}

struct Connection {
    state: SocketState,
    writer: Option<Arc<AsyncMutex<WsWriter>>>,
    /// Consecutive failed dials since the last successful open.
    attempts: u32,
    /// Invalidates tasks that outlive a disconnect/reconnect.
    generation: u64,
    user_id: String,
    user_type: SenderType,
    listener: Arc<dyn SocketListener>,
    io_task: Option<JoinHandle<()>>,
    heartbeat: Option<JoinHandle<()>>,
    reconnect: Option<JoinHandle<()>>,
}

struct ManagerInner {
    config: SocketConfig,
    // Both maps are only locked for short, await-free sections.
    connections: Mutex<HashMap<String, Connection>>,
    handlers: Mutex<HashMap<String, Vec<(HandlerId, Arc<dyn FrameHandler>)>>>,
    next_handler_id: AtomicU64,
    next_generation: AtomicU64,
}

/// Cloneable handle over the shared connection state. Owned by the
/// application's composition root and injected where needed; there is no
/// process-wide singleton.
#[derive(Clone)]
pub struct ChatSocketManager {
    inner: Arc<ManagerInner>,
}

impl ChatSocketManager {
    pub fn new(config: SocketConfig) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                config,
                connections: Mutex::new(HashMap::new()),
                handlers: Mutex::new(HashMap::new()),
                next_handler_id: AtomicU64::new(1),
                next_generation: AtomicU64::new(1),
            }),
        }
    }

    /// Open (or reuse) the channel for `thread_id`.
    ///
    /// Idempotent: if a live socket exists it is reused, and an already-open
    /// channel immediately re-notifies the new listener with
    /// `connected = true`. A `Closed` entry (deliberate disconnect or
    /// exhausted reconnects) starts over with a fresh attempt counter.
    pub fn connect(
        &self,
        thread_id: &str,
        user_id: &str,
        user_type: SenderType,
        listener: Arc<dyn SocketListener>,
    ) {
        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        {
            let mut conns = self.inner.connections.lock().unwrap();
            if let Some(conn) = conns.get_mut(thread_id) {
                match conn.state {
                    SocketState::Open => {
                        debug!("[WsManager] reusing open channel for thread {}", thread_id);
                        conn.listener = listener.clone();
                        let tid = thread_id.to_string();
                        tokio::spawn(async move {
                            listener.on_status_changed(&tid, true).await;
                        });
                        return;
                    }
                    SocketState::Connecting | SocketState::Reconnecting => {
                        debug!(
                            "[WsManager] channel for thread {} already {:?}, reusing",
                            thread_id, conn.state
                        );
                        conn.listener = listener;
                        return;
                    }
                    SocketState::Idle | SocketState::Closed => {}
                }
            }
            conns.insert(
                thread_id.to_string(),
                Connection {
                    state: SocketState::Connecting,
                    writer: None,
                    attempts: 0,
                    generation,
                    user_id: user_id.to_string(),
                    user_type,
                    listener,
                    io_task: None,
                    heartbeat: None,
                    reconnect: None,
                },
            );
        }

        info!(
            "[WsManager] 🔗 opening channel for thread {} (user={}, type={})",
            thread_id, user_id, user_type
        );
        let inner = self.inner.clone();
        let tid = thread_id.to_string();
        let handle = tokio::spawn(async move {
            Self::run_io(inner, tid, generation).await;
        });
        let mut conns = self.inner.connections.lock().unwrap();
        if let Some(conn) = conns.get_mut(thread_id) {
            if conn.generation == generation {
                conn.io_task = Some(handle);
            }
        }
    }

    /// Deliberately close the channel for `thread_id` (close code 1000).
    ///
    /// Cancels any pending reconnect timer and heartbeat, and removes every
    /// registered frame handler for the thread. No reconnect fires
    /// afterwards.
    pub async fn disconnect(&self, thread_id: &str) {
        let conn = self.inner.connections.lock().unwrap().remove(thread_id);
        self.inner.handlers.lock().unwrap().remove(thread_id);

        let Some(mut conn) = conn else {
            debug!("[WsManager] disconnect: no channel for thread {}", thread_id);
            return;
        };
        if let Some(timer) = conn.reconnect.take() {
            timer.abort();
        }
        if let Some(hb) = conn.heartbeat.take() {
            hb.abort();
        }
        if let Some(writer) = conn.writer.take() {
            let frame = CloseFrame {
                code: CloseCode::Normal,
                reason: "client disconnect".into(),
            };
            let mut w = writer.lock().await;
            if let Err(e) = w.send(WsMessage::Close(Some(frame))).await {
                debug!(
                    "[WsManager] close frame for thread {} not sent: {}",
                    thread_id, e
                );
            }
        }
        // The entry is gone, so the read task neither reconnects nor
        // notifies; abort it rather than wait out the close handshake.
        if let Some(task) = conn.io_task.take() {
            task.abort();
        }
        info!("[WsManager] 👋 channel for thread {} closed", thread_id);
    }

    /// Send one JSON frame on the thread's socket.
    ///
    /// Returns `false` (and logs) when the socket is not `Open`; it never
    /// errors. Retry policy is the caller's concern.
    pub async fn send_frame(&self, thread_id: &str, frame: &OutboundFrame) -> bool {
        let writer = {
            let conns = self.inner.connections.lock().unwrap();
            match conns.get(thread_id) {
                Some(conn) if conn.state == SocketState::Open => conn.writer.clone(),
                _ => None,
            }
        };
        let Some(writer) = writer else {
            warn!(
                "[WsManager] dropping frame, thread {} is not connected",
                thread_id
            );
            return false;
        };
        let text = match serde_json::to_string(frame) {
            Ok(text) => text,
            Err(e) => {
                error!("[WsManager] frame serialization failed: {}", e);
                return false;
            }
        };
        let mut w = writer.lock().await;
        match w.send(WsMessage::Text(text)).await {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    "[WsManager] send on thread {} failed: {}",
                    thread_id, e
                );
                false
            }
        }
    }

    /// Register a handler for every inbound frame on `thread_id`.
    pub fn add_frame_handler(
        &self,
        thread_id: &str,
        handler: Arc<dyn FrameHandler>,
    ) -> HandlerId {
        let id = self.inner.next_handler_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .handlers
            .lock()
            .unwrap()
            .entry(thread_id.to_string())
            .or_default()
            .push((id, handler));
        id
    }

    /// Remove a previously registered handler. Removing the last handler
    /// does not close the connection.
    pub fn remove_frame_handler(&self, thread_id: &str, id: HandlerId) {
        let mut handlers = self.inner.handlers.lock().unwrap();
        if let Some(list) = handlers.get_mut(thread_id) {
            list.retain(|(hid, _)| *hid != id);
            if list.is_empty() {
                handlers.remove(thread_id);
            }
        }
    }

    /// Whether the thread's socket is currently `Open`.
    pub fn is_connected(&self, thread_id: &str) -> bool {
        self.state(thread_id) == SocketState::Open
    }

    /// Current channel state for `thread_id` (`Idle` when unknown).
    pub fn state(&self, thread_id: &str) -> SocketState {
        self.inner
            .connections
            .lock()
            .unwrap()
            .get(thread_id)
            .map(|c| c.state)
            .unwrap_or(SocketState::Idle)
    }

    fn build_url(config: &SocketConfig, thread_id: &str, user_id: &str, user_type: SenderType) -> String {
        format!(
            "{}/api/v1/chat/ws/{}?user_id={}&user_type={}",
            config.ws_base_url.trim_end_matches('/'),
            thread_id,
            user_id,
            user_type
        )
    }

    /// Dial the thread's endpoint, pump the read side until the stream ends,
    /// then decide between giving up and scheduling a reconnect.
    ///
    /// Boxed because the reconnect path recurses back into `run_io`.
    fn run_io(
        inner: Arc<ManagerInner>,
        thread_id: String,
        generation: u64,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>> {
        Box::pin(async move {
        let (user_id, user_type, listener) = {
            let conns = inner.connections.lock().unwrap();
            let Some(conn) = conns.get(&thread_id) else {
                return;
            };
            if conn.generation != generation {
                return;
            }
            (conn.user_id.clone(), conn.user_type, conn.listener.clone())
        };
        let url = Self::build_url(&inner.config, &thread_id, &user_id, user_type);

        let stream = match connect_async(&url).await {
            Ok((stream, response)) => {
                debug!(
                    "[WsManager] thread {} handshake done, status: {}",
                    thread_id,
                    response.status()
                );
                stream
            }
            Err(e) => {
                warn!("[WsManager] dial for thread {} failed: {}", thread_id, e);
                Self::on_stream_end(inner, thread_id, generation, StreamEnd::Abnormal).await;
                return;
            }
        };

        let (write, read) = stream.split();
        let writer = Arc::new(AsyncMutex::new(write));
        let stale = {
            let mut conns = inner.connections.lock().unwrap();
            match conns.get_mut(&thread_id) {
                Some(conn) if conn.generation == generation => {
                    conn.state = SocketState::Open;
                    conn.attempts = 0;
                    conn.writer = Some(writer.clone());
                    conn.heartbeat = Some(Self::spawn_heartbeat(
                        writer.clone(),
                        thread_id.clone(),
                        inner.config.heartbeat_interval,
                    ));
                    false
                }
                _ => true,
            }
        };
        if stale {
            // Disconnected while dialing; hand the fresh socket back.
            debug!("[WsManager] thread {} dial superseded, closing", thread_id);
            let _ = writer.lock().await.send(WsMessage::Close(None)).await;
            return;
        }

        info!("[WsManager] ✅ thread {} connected", thread_id);
        listener.on_status_changed(&thread_id, true).await;

        let end = Self::read_loop(&inner, &thread_id, read).await;
        Self::on_stream_end(inner, thread_id, generation, end).await;
        })
    }

    fn spawn_heartbeat(
        writer: Arc<AsyncMutex<WsWriter>>,
        thread_id: String,
        period: Duration,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let text = match serde_json::to_string(&OutboundFrame::Ping) {
                    Ok(text) => text,
                    Err(_) => break,
                };
                let mut w = writer.lock().await;
                if w.send(WsMessage::Text(text)).await.is_err() {
                    debug!("[WsManager] heartbeat on thread {} failed, stopping", thread_id);
                    break;
                }
            }
        })
    }

    async fn read_loop(inner: &Arc<ManagerInner>, thread_id: &str, mut read: WsReader) -> StreamEnd {
        while let Some(item) = read.next().await {
            match item {
                Ok(WsMessage::Text(text)) => match serde_json::from_str::<ChatFrame>(&text) {
                    Ok(frame) => Self::dispatch(inner, thread_id, &frame).await,
                    Err(e) => {
                        warn!(
                            "[WsManager] unparseable frame on thread {}: {} ({})",
                            thread_id, e, text
                        );
                    }
                },
                Ok(WsMessage::Binary(_)) => {
                    debug!("[WsManager] ignoring binary frame on thread {}", thread_id);
                }
                Ok(WsMessage::Ping(_)) | Ok(WsMessage::Pong(_)) => {}
                Ok(WsMessage::Close(frame)) => {
                    // 1005: closed without a code on the wire.
                    let code = frame.as_ref().map(|f| u16::from(f.code)).unwrap_or(1005);
                    info!(
                        "[WsManager] thread {} closed by peer, code {}",
                        thread_id, code
                    );
                    return if code == 1000 || code == 1001 {
                        StreamEnd::Normal
                    } else {
                        StreamEnd::Abnormal
                    };
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("[WsManager] read error on thread {}: {}", thread_id, e);
                    return StreamEnd::Abnormal;
                }
            }
        }
        // Stream ended without a close handshake.
        StreamEnd::Abnormal
    }

    /// Fan one frame out to every handler registered for the thread at this
    /// moment. Awaited sequentially so per-socket delivery order is kept.
    async fn dispatch(inner: &Arc<ManagerInner>, thread_id: &str, frame: &ChatFrame) {
        let handlers: Vec<Arc<dyn FrameHandler>> = {
            let map = inner.handlers.lock().unwrap();
            map.get(thread_id)
                .map(|list| list.iter().map(|(_, h)| h.clone()).collect())
                .unwrap_or_default()
        };
        for handler in handlers {
            handler.on_frame(thread_id, frame).await;
        }
    }

    async fn on_stream_end(
        inner: Arc<ManagerInner>,
        thread_id: String,
        generation: u64,
        end: StreamEnd,
    ) {
        enum Next {
            Notify(Arc<dyn SocketListener>),
            GiveUp(Arc<dyn SocketListener>, u32),
            Retry(Arc<dyn SocketListener>, Duration, u32),
        }

        let next = {
            let mut conns = inner.connections.lock().unwrap();
            let Some(conn) = conns.get_mut(&thread_id) else {
                // Deliberate disconnect already tore the entry down.
                return;
            };
            if conn.generation != generation {
                return;
            }
            if let Some(hb) = conn.heartbeat.take() {
                hb.abort();
            }
            conn.writer = None;
            match end {
                StreamEnd::Normal => {
                    conn.state = SocketState::Closed;
                    Next::Notify(conn.listener.clone())
                }
                StreamEnd::Abnormal => {
                    conn.attempts += 1;
                    if conn.attempts >= inner.config.max_reconnect_attempts {
                        conn.state = SocketState::Closed;
                        Next::GiveUp(conn.listener.clone(), conn.attempts)
                    } else {
                        conn.state = SocketState::Reconnecting;
                        let delay = inner.config.reconnect_delay(conn.attempts);
                        Next::Retry(conn.listener.clone(), delay, conn.attempts)
                    }
                }
            }
        };

        match next {
            Next::Notify(listener) => {
                listener.on_status_changed(&thread_id, false).await;
            }
            Next::GiveUp(listener, attempts) => {
                warn!(
                    "[WsManager] ❌ thread {} gave up after {} failed attempts; call connect again to retry",
                    thread_id, attempts
                );
                listener.on_status_changed(&thread_id, false).await;
            }
            Next::Retry(listener, delay, attempt) => {
                listener.on_status_changed(&thread_id, false).await;
                info!(
                    "[WsManager] 🔄 thread {} reconnecting in {:?} (attempt {}/{})",
                    thread_id, delay, attempt, inner.config.max_reconnect_attempts
                );
                let inner2 = inner.clone();
                let tid = thread_id.clone();
                let timer = tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    Self::run_io(inner2, tid, generation).await;
                });
                let mut conns = inner.connections.lock().unwrap();
                if let Some(conn) = conns.get_mut(&thread_id) {
                    if conn.generation == generation {
                        conn.reconnect = Some(timer);
                    } else {
                        timer.abort();
                    }
                } else {
                    timer.abort();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Once;
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;
    use tokio::time::sleep;

    static INIT_LOGGER: Once = Once::new();

    fn init_test_logger() {
        INIT_LOGGER.call_once(|| {
            use tracing_subscriber::prelude::*;
            use tracing_subscriber::EnvFilter;

            let filter_layer = EnvFilter::new("info,timber_market_sdk=debug");
            let fmt_layer = tracing_subscriber::fmt::layer()
                .with_file(true)
                .with_line_number(true)
                .with_target(false)
                .with_test_writer();

            tracing_subscriber::registry()
                .with(filter_layer)
                .with(fmt_layer)
                .init();
        });
    }

    fn test_config(addr: std::net::SocketAddr) -> SocketConfig {
        SocketConfig {
            ws_base_url: format!("ws://{}", addr),
            heartbeat_interval: Duration::from_secs(30),
            reconnect_base_delay: Duration::from_millis(50),
            max_reconnect_attempts: 5,
        }
    }

    struct StatusRecorder {
        events: Mutex<Vec<bool>>,
    }

    impl StatusRecorder {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                events: Mutex::new(Vec::new()),
            })
        }

        fn events(&self) -> Vec<bool> {
            self.events.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SocketListener for StatusRecorder {
        async fn on_status_changed(&self, _thread_id: &str, connected: bool) {
            self.events.lock().unwrap().push(connected);
        }
    }

    struct FrameRecorder {
        frames: Mutex<Vec<ChatFrame>>,
    }

    impl FrameRecorder {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                frames: Mutex::new(Vec::new()),
            })
        }

        fn frames(&self) -> Vec<ChatFrame> {
            self.frames.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl FrameHandler for FrameRecorder {
        async fn on_frame(&self, _thread_id: &str, frame: &ChatFrame) {
            self.frames.lock().unwrap().push(frame.clone());
        }
    }

    async fn wait_until<F: Fn() -> bool>(cond: F, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            if cond() {
                return true;
            }
            sleep(Duration::from_millis(10)).await;
        }
        cond()
    }

    /// Server that accepts and keeps every connection open, counting accepts.
    async fn spawn_holding_server() -> (std::net::SocketAddr, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accepts = Arc::new(AtomicUsize::new(0));
        let accepts2 = accepts.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                accepts2.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(async move {
                    if let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await {
                        while let Some(Ok(_)) = ws.next().await {}
                    }
                });
            }
        });
        (addr, accepts)
    }

    /// Server that accepts the TCP connection and drops it before the
    /// WebSocket handshake, so every dial fails. Counts accepts.
    async fn spawn_dropping_server() -> (std::net::SocketAddr, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accepts = Arc::new(AtomicUsize::new(0));
        let accepts2 = accepts.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                accepts2.fetch_add(1, Ordering::SeqCst);
                drop(stream);
            }
        });
        (addr, accepts)
    }

    #[test]
    fn backoff_doubles_per_attempt() {
        let config = SocketConfig::default();
        assert_eq!(config.reconnect_delay(1), Duration::from_millis(3000));
        assert_eq!(config.reconnect_delay(2), Duration::from_millis(6000));
        assert_eq!(config.reconnect_delay(3), Duration::from_millis(12000));
        assert_eq!(config.reconnect_delay(4), Duration::from_millis(24000));
        assert_eq!(config.reconnect_delay(5), Duration::from_millis(48000));
    }

    #[tokio::test]
    async fn connect_twice_opens_a_single_socket() {
        init_test_logger();
        let (addr, accepts) = spawn_holding_server().await;
        let manager = ChatSocketManager::new(test_config(addr));
        let recorder = StatusRecorder::new();

        manager.connect("t1", "u1", SenderType::Buyer, recorder.clone());
        manager.connect("t1", "u1", SenderType::Buyer, recorder.clone());
        assert!(
            wait_until(|| manager.is_connected("t1"), Duration::from_secs(2)).await,
            "socket should open"
        );
        // Give a hypothetical duplicate dial time to land.
        sleep(Duration::from_millis(150)).await;
        assert_eq!(accepts.load(Ordering::SeqCst), 1);

        // A third connect against the open channel re-announces the status.
        let late = StatusRecorder::new();
        manager.connect("t1", "u1", SenderType::Buyer, late.clone());
        assert!(
            wait_until(|| late.events() == vec![true], Duration::from_secs(2)).await,
            "late listener should be re-notified, got {:?}",
            late.events()
        );
        assert_eq!(accepts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn send_without_connection_returns_false() {
        init_test_logger();
        let manager = ChatSocketManager::new(SocketConfig::default());
        let frame = OutboundFrame::Message {
            message: "hi".to_string(),
        };
        assert!(!manager.send_frame("t1", &frame).await);
        assert!(!manager.is_connected("t1"));
        assert_eq!(manager.state("t1"), SocketState::Idle);
    }

    #[tokio::test]
    async fn frames_fan_out_to_all_handlers_registered_at_delivery_time() {
        init_test_logger();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, mut rx) = mpsc::channel::<String>(8);
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            while let Some(text) = rx.recv().await {
                ws.send(WsMessage::Text(text)).await.unwrap();
            }
        });

        let manager = ChatSocketManager::new(test_config(addr));
        manager.connect("t1", "u1", SenderType::Buyer, StatusRecorder::new());
        assert!(wait_until(|| manager.is_connected("t1"), Duration::from_secs(2)).await);

        let ha = FrameRecorder::new();
        let hb = FrameRecorder::new();
        manager.add_frame_handler("t1", ha.clone());
        let hb_id = manager.add_frame_handler("t1", hb.clone());

        tx.send(r#"{"type":"message","message":"hi"}"#.to_string())
            .await
            .unwrap();
        assert!(wait_until(|| ha.frames().len() == 1 && hb.frames().len() == 1, Duration::from_secs(2)).await);

        // Registered after the first frame: must only ever see the second.
        let hc = FrameRecorder::new();
        manager.add_frame_handler("t1", hc.clone());
        manager.remove_frame_handler("t1", hb_id);

        tx.send(r#"{"type":"typing","user_id":"u2"}"#.to_string())
            .await
            .unwrap();
        assert!(wait_until(|| hc.frames().len() == 1, Duration::from_secs(2)).await);

        assert_eq!(
            ha.frames(),
            vec![
                ChatFrame::Message {
                    id: None,
                    thread_id: None,
                    sender_id: None,
                    sender_type: None,
                    message: "hi".to_string(),
                    created_at: None,
                },
                ChatFrame::Typing {
                    user_id: Some("u2".to_string())
                },
            ]
        );
        // Removed before the second frame.
        assert_eq!(hb.frames().len(), 1);
        assert_eq!(
            hc.frames(),
            vec![ChatFrame::Typing {
                user_id: Some("u2".to_string())
            }]
        );
        // Removing the last handler keeps the connection up.
        assert!(manager.is_connected("t1"));
    }

    #[tokio::test]
    async fn abnormal_close_schedules_backoff_and_gives_up_at_the_limit() {
        init_test_logger();
        let (addr, accepts) = spawn_dropping_server().await;
        let mut config = test_config(addr);
        config.reconnect_base_delay = Duration::from_millis(10);
        config.max_reconnect_attempts = 3;
        let manager = ChatSocketManager::new(config);
        let recorder = StatusRecorder::new();

        manager.connect("t1", "u1", SenderType::Buyer, recorder.clone());
        // Dial 1 + retries 1..2, then the third consecutive failure stops it.
        assert!(
            wait_until(
                || manager.state("t1") == SocketState::Closed,
                Duration::from_secs(3)
            )
            .await,
            "manager should give up, state {:?}",
            manager.state("t1")
        );
        sleep(Duration::from_millis(200)).await;
        assert_eq!(accepts.load(Ordering::SeqCst), 3, "exactly 3 dials expected");
        assert!(!manager.is_connected("t1"));

        // An explicit connect starts over with a fresh attempt counter.
        manager.connect("t1", "u1", SenderType::Buyer, recorder.clone());
        assert!(
            wait_until(|| accepts.load(Ordering::SeqCst) > 3, Duration::from_secs(2)).await,
            "fresh connect should dial again"
        );
    }

    #[tokio::test]
    async fn disconnect_cancels_pending_reconnect() {
        init_test_logger();
        let (addr, accepts) = spawn_dropping_server().await;
        let mut config = test_config(addr);
        config.reconnect_base_delay = Duration::from_millis(400);
        let manager = ChatSocketManager::new(config);
        let recorder = StatusRecorder::new();

        manager.connect("t1", "u1", SenderType::Buyer, recorder.clone());
        assert!(
            wait_until(|| recorder.events().contains(&false), Duration::from_secs(2)).await,
            "first drop should be reported"
        );
        assert_eq!(accepts.load(Ordering::SeqCst), 1);

        // The 400ms reconnect timer is pending now; disconnect must kill it.
        manager.disconnect("t1").await;
        assert!(!manager.is_connected("t1"));
        assert_eq!(manager.state("t1"), SocketState::Idle);

        sleep(Duration::from_millis(700)).await;
        assert_eq!(
            accepts.load(Ordering::SeqCst),
            1,
            "cancelled reconnect timer must not dial"
        );
    }

    #[tokio::test]
    async fn peer_normal_close_does_not_reconnect() {
        init_test_logger();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accepts = Arc::new(AtomicUsize::new(0));
        let accepts2 = accepts.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                accepts2.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(async move {
                    let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
                    let frame = CloseFrame {
                        code: CloseCode::Normal,
                        reason: "done".into(),
                    };
                    let _ = ws.send(WsMessage::Close(Some(frame))).await;
                    while let Some(Ok(_)) = ws.next().await {}
                });
            }
        });

        let mut config = test_config(addr);
        config.reconnect_base_delay = Duration::from_millis(20);
        let manager = ChatSocketManager::new(config);
        let recorder = StatusRecorder::new();
        manager.connect("t1", "u1", SenderType::Buyer, recorder.clone());

        assert!(
            wait_until(
                || manager.state("t1") == SocketState::Closed,
                Duration::from_secs(2)
            )
            .await
        );
        sleep(Duration::from_millis(200)).await;
        assert_eq!(accepts.load(Ordering::SeqCst), 1, "code 1000 must not reconnect");
    }

    #[tokio::test]
    async fn heartbeat_pings_while_open() {
        init_test_logger();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let pings = Arc::new(AtomicUsize::new(0));
        let pings2 = pings.clone();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            while let Some(Ok(msg)) = ws.next().await {
                if let WsMessage::Text(text) = msg {
                    if text == r#"{"type":"ping"}"# {
                        pings2.fetch_add(1, Ordering::SeqCst);
                    }
                }
            }
        });

        let mut config = test_config(addr);
        config.heartbeat_interval = Duration::from_millis(50);
        let manager = ChatSocketManager::new(config);
        manager.connect("t1", "u1", SenderType::Buyer, StatusRecorder::new());
        assert!(wait_until(|| manager.is_connected("t1"), Duration::from_secs(2)).await);

        assert!(
            wait_until(|| pings.load(Ordering::SeqCst) >= 2, Duration::from_secs(2)).await,
            "expected periodic pings, saw {}",
            pings.load(Ordering::SeqCst)
        );
        manager.disconnect("t1").await;
    }

    #[tokio::test]
    async fn disconnect_then_is_connected_is_false() {
        init_test_logger();
        let (addr, _accepts) = spawn_holding_server().await;
        let manager = ChatSocketManager::new(test_config(addr));
        manager.connect("t1", "u1", SenderType::Buyer, StatusRecorder::new());
        assert!(wait_until(|| manager.is_connected("t1"), Duration::from_secs(2)).await);

        manager.disconnect("t1").await;
        assert!(!manager.is_connected("t1"));
        let frame = OutboundFrame::Message {
            message: "late".to_string(),
        };
        assert!(!manager.send_frame("t1", &frame).await);
    }
}
