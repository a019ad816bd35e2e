//! Marketplace client facade.
//!
//! Composition root for the SDK: builds the shared HTTP client, the catalog
//! and thread REST clients, the socket manager, and the chat session, and
//! exposes the common operations in one place.

use crate::market::catalog::api::CatalogApi;
use crate::market::socket::{ChatSocketManager, SocketConfig};
use crate::market::thread::api::ThreadApi;
use crate::market::thread::listener::{EmptyThreadListener, ThreadListener};
use crate::market::thread::models::{ChatMessage, ChatThread};
use crate::market::thread::service::{SessionState, ThreadSession};
use crate::market::types::SenderType;
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Client configuration.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Local user id.
    pub user_id: String,
    /// Which side of conversations the local user is on.
    pub user_type: SenderType,
    /// REST base URL, e.g. `http://localhost:8000`.
    pub api_base_url: String,
    /// WebSocket base URL, e.g. `ws://localhost:8000`.
    pub ws_base_url: String,
    /// Fixed timeout applied to every REST request.
    pub request_timeout: Duration,
    /// Keep-alive ping cadence on open chat sockets.
    pub heartbeat_interval: Duration,
    /// Base delay of the reconnect backoff.
    pub reconnect_base_delay: Duration,
    /// Failed dials tolerated before a thread stays disconnected.
    pub max_reconnect_attempts: u32,
    /// TTL of the product search cache.
    pub search_cache_ttl: Duration,
}

impl ClientConfig {
    /// Default configuration against a local backend.
    pub fn new(user_id: String, user_type: SenderType) -> Self {
        Self {
            user_id,
            user_type,
            api_base_url: "http://localhost:8000".to_string(),
            ws_base_url: "ws://localhost:8000".to_string(),
            request_timeout: Duration::from_secs(30),
            heartbeat_interval: Duration::from_secs(30),
            reconnect_base_delay: Duration::from_millis(3000),
            max_reconnect_attempts: 5,
            search_cache_ttl: Duration::from_secs(60),
        }
    }
}

/// Buyer-facing marketplace client: catalog browsing plus realtime chat.
#[derive(Clone)]
pub struct MarketClient {
    config: ClientConfig,
    catalog: Arc<CatalogApi>,
    threads: Arc<ThreadApi>,
    sockets: ChatSocketManager,
    session: ThreadSession,
}

impl MarketClient {
    /// Build a client with no chat callbacks registered.
    pub fn new(config: ClientConfig) -> Result<Self> {
        Self::with_listener(config, Arc::new(EmptyThreadListener))
    }

    /// Build a client delivering chat events to `listener`.
    pub fn with_listener(config: ClientConfig, listener: Arc<dyn ThreadListener>) -> Result<Self> {
        let http_client = reqwest::ClientBuilder::new()
            .timeout(config.request_timeout)
            .build()
            .context("failed to build HTTP client")?;

        let catalog = Arc::new(CatalogApi::new(
            http_client.clone(),
            config.api_base_url.clone(),
            config.search_cache_ttl,
        ));
        let threads = Arc::new(ThreadApi::new(
            http_client,
            config.api_base_url.clone(),
            config.user_id.clone(),
            config.user_type,
        ));
        let sockets = ChatSocketManager::new(SocketConfig {
            ws_base_url: config.ws_base_url.clone(),
            heartbeat_interval: config.heartbeat_interval,
            reconnect_base_delay: config.reconnect_base_delay,
            max_reconnect_attempts: config.max_reconnect_attempts,
        });
        let session = ThreadSession::new(threads.clone(), sockets.clone(), listener);

        info!(
            "[Client] 🔧 market client ready (user={}, type={})",
            config.user_id, config.user_type
        );
        Ok(Self {
            config,
            catalog,
            threads,
            sockets,
            session,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Product/wood-type/user REST surface.
    pub fn catalog(&self) -> &CatalogApi {
        &self.catalog
    }

    /// Raw chat REST surface; the session is usually the better entry point.
    pub fn threads(&self) -> &ThreadApi {
        &self.threads
    }

    /// Per-thread socket channels.
    pub fn sockets(&self) -> &ChatSocketManager {
        &self.sockets
    }

    /// The chat session (focused thread, timeline, unread counters).
    pub fn session(&self) -> &ThreadSession {
        &self.session
    }

    // Convenience delegations for the common chat flow.

    pub async fn list_threads(&self) -> Result<Vec<ChatThread>> {
        self.session.list_threads().await
    }

    pub async fn open_thread(&self, thread_id: &str) -> Result<Vec<ChatMessage>> {
        self.session.open_thread(thread_id).await
    }

    pub async fn send_message(&self, text: &str) -> Result<ChatMessage> {
        self.session.send_message(text).await
    }

    pub async fn send_to_seller(&self, seller_id: &str, text: &str) -> Result<ChatMessage> {
        self.session.send_to_seller(seller_id, text).await
    }

    pub async fn close_thread(&self) {
        self.session.close().await
    }

    pub fn session_state(&self) -> SessionState {
        self.session.state()
    }

    pub fn is_connected(&self, thread_id: &str) -> bool {
        self.sockets.is_connected(thread_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::thread::listener::ThreadListener;
    use async_trait::async_trait;
    use std::sync::Once;
    use tracing::info;

    static INIT_LOGGER: Once = Once::new();

    fn init_test_logger() {
        INIT_LOGGER.call_once(|| {
            use tracing_subscriber::prelude::*;
            use tracing_subscriber::EnvFilter;

            let filter_layer = EnvFilter::new("info,timber_market_sdk=debug,reqwest=info");
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

    #[test]
    fn config_defaults_match_the_backend_contract() {
        let config = ClientConfig::new("u1".to_string(), SenderType::Buyer);
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(config.reconnect_base_delay, Duration::from_millis(3000));
        assert_eq!(config.max_reconnect_attempts, 5);
    }

    /// End-to-end smoke test against a locally running backend.
    #[tokio::test]
    #[ignore]
    async fn run_market_client() {
        init_test_logger();

        struct PrintListener;
        #[async_trait]
        impl ThreadListener for PrintListener {
            async fn on_state_changed(&self, state: SessionState) {
                info!("[Test] state: {:?}", state);
            }
            async fn on_message(&self, message: ChatMessage) {
                info!("[Test] message: {} {}", message.sender_id, message.message);
            }
            async fn on_thread_updated(&self, thread_id: String, unread_count: i64) {
                info!("[Test] unread on {}: {}", thread_id, unread_count);
            }
            async fn on_typing(&self, thread_id: String, user_id: String, typing: bool) {
                info!("[Test] typing on {}: {} {}", thread_id, user_id, typing);
            }
            async fn on_presence(&self, thread_id: String, user_id: String, joined: bool) {
                info!("[Test] presence on {}: {} {}", thread_id, user_id, joined);
            }
            async fn on_send_failed(&self, local_id: String, draft: String) {
                info!("[Test] send failed: {} draft={}", local_id, draft);
            }
        }

        let config = ClientConfig::new("demo-buyer".to_string(), SenderType::Buyer);
        let client = MarketClient::with_listener(config, Arc::new(PrintListener))
            .expect("client must build");

        let threads = client.list_threads().await.expect("backend reachable");
        info!("[Test] {} threads", threads.len());
        if let Some(thread) = threads.first() {
            let history = client.open_thread(&thread.id).await.unwrap();
            info!("[Test] {} messages in history", history.len());
            client.send_message("ping from the sdk test").await.unwrap();
            tokio::time::sleep(Duration::from_secs(2)).await;
            client.close_thread().await;
        }
    }
}
