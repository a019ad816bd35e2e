//! Timber marketplace CLI client (test build).
//!
//! Non-interactive CLI for exercising the SDK against a running backend:
//! lists chat threads, optionally opens one, optionally sends a message, and
//! prints every chat event it receives.

use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use timber_market_sdk::market::client::{ClientConfig, MarketClient};
use timber_market_sdk::market::thread::listener::ThreadListener;
use timber_market_sdk::market::thread::models::ChatMessage;
use timber_market_sdk::market::thread::service::SessionState;
use timber_market_sdk::market::types::SenderType;
use tokio::time::{sleep, Duration};
use tracing::{error, info};

/// Timber marketplace CLI client
#[derive(Parser, Debug)]
#[command(name = "timber-market-cli")]
#[command(about = "Timber marketplace CLI client - exercises catalog and chat", long_about = None)]
struct Args {
    /// Local user id
    #[arg(short, long, default_value = "demo-buyer")]
    user_id: String,

    /// Side of the conversation: buyer or seller
    #[arg(long, default_value = "buyer")]
    user_type: SenderType,

    /// REST base URL
    #[arg(long, default_value = "http://localhost:8000")]
    api_url: String,

    /// WebSocket base URL
    #[arg(long, default_value = "ws://localhost:8000")]
    ws_url: String,

    /// Thread to open and tail (default: the first listed one, if any)
    #[arg(short, long)]
    thread: Option<String>,

    /// One-shot message to send after opening the thread
    #[arg(short, long)]
    send: Option<String>,

    /// Run duration in seconds, 0 keeps running
    #[arg(short, long, default_value = "0")]
    duration: u64,

    /// Log filter
    #[arg(long, default_value = "info,timber_market_sdk=debug")]
    log_level: String,
}

/// Initialize logging to stdout and a `debug.log` file.
fn init_logger(log_level: &str) {
    use std::fs::OpenOptions;
    use std::io;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    // RUST_LOG wins over the command line flag when set.
    let filter_layer =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open("debug.log")
        .expect("failed to open debug.log");

    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stdout)
        .with_file(true)
        .with_line_number(true)
        .with_target(false)
        .with_ansi(true);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_file(true)
        .with_line_number(true)
        .with_target(false)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(stdout_layer)
        .with(file_layer)
        .init();

    info!("[CLI] 📝 logging to stdout and debug.log");
}

struct CliThreadListener;

#[async_trait::async_trait]
impl ThreadListener for CliThreadListener {
    async fn on_state_changed(&self, state: SessionState) {
        info!("[CLI/Chat] 🔄 session state: {:?}", state);
    }

    async fn on_message(&self, message: ChatMessage) {
        info!(
            "[CLI/Chat] 📨 [{}] {} ({}): {}",
            message.created_at, message.sender_id, message.sender_type, message.message
        );
    }

    async fn on_thread_updated(&self, thread_id: String, unread_count: i64) {
        info!("[CLI/Chat] 📬 thread {} unread: {}", thread_id, unread_count);
    }

    async fn on_typing(&self, thread_id: String, user_id: String, typing: bool) {
        if typing {
            info!("[CLI/Chat] ⌨️ {} is typing on {}", user_id, thread_id);
        } else {
            info!("[CLI/Chat] ⌨️ {} stopped typing on {}", user_id, thread_id);
        }
    }

    async fn on_presence(&self, thread_id: String, user_id: String, joined: bool) {
        info!(
            "[CLI/Chat] 👥 {} {} thread {}",
            user_id,
            if joined { "joined" } else { "left" },
            thread_id
        );
    }

    async fn on_send_failed(&self, local_id: String, draft: String) {
        error!("[CLI/Chat] ❌ send {} failed, draft kept: {}", local_id, draft);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logger(&args.log_level);

    info!("[CLI] 🚀 timber marketplace CLI (test mode)");
    info!("[CLI] 👤 user: {} ({})", args.user_id, args.user_type);
    info!("[CLI] ⏱️ duration: {} seconds (0 = keep running)", args.duration);

    let mut config = ClientConfig::new(args.user_id.clone(), args.user_type);
    config.api_base_url = args.api_url.clone();
    config.ws_base_url = args.ws_url.clone();
    let client = MarketClient::with_listener(config, Arc::new(CliThreadListener))?;

    // Initial overview: a catalog page and the thread list.
    match client.catalog().list_products(0, 5).await {
        Ok((products, total)) => {
            info!("[CLI] 🪵 catalog: {} products (showing {})", total, products.len());
            for product in &products {
                info!(
                    "[CLI]   - {} | {:.2} m³ | {:.0}",
                    product.title, product.volume, product.price
                );
            }
        }
        Err(e) => error!("[CLI] catalog unavailable: {}", e),
    }

    let threads = client.list_threads().await?;
    info!("[CLI] 📋 {} chat threads", threads.len());
    for thread in threads.iter().take(5) {
        info!(
            "[CLI]   - {} | seller {} | unread {} | last: {}",
            thread.id,
            thread.seller_id,
            thread.unread_count,
            thread.last_message.as_deref().unwrap_or("-")
        );
    }

    let thread_id = args
        .thread
        .clone()
        .or_else(|| threads.first().map(|t| t.id.clone()));

    if let Some(thread_id) = thread_id {
        let history = client.open_thread(&thread_id).await?;
        info!(
            "[CLI] 📖 opened thread {} with {} messages",
            thread_id,
            history.len()
        );
        if let Some(text) = &args.send {
            let sent = client.send_message(text).await?;
            info!("[CLI] ✅ sent message {}", sent.id);
        }
    } else {
        info!("[CLI] 💤 no thread to open; listening for nothing in particular");
    }

    if args.duration > 0 {
        info!("[CLI] ⏰ exiting in {} seconds", args.duration);
        sleep(Duration::from_secs(args.duration)).await;
        client.close_thread().await;
        info!("[CLI] 👋 bye");
    } else {
        info!("[CLI] ⏰ running until Ctrl+C");
        loop {
            sleep(Duration::from_secs(3600)).await;
        }
    }

    Ok(())
}
