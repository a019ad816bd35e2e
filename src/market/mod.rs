pub mod catalog;
pub mod client;
pub mod socket;
pub mod thread;
pub mod types;

// Re-export the common entry points.
pub use client::{ClientConfig, MarketClient};
pub use socket::{ChatSocketManager, SocketConfig, SocketState};
pub use thread::{ChatMessage, ChatThread, SessionState, ThreadSession};
pub use types::{ChatFrame, OutboundFrame, SenderType};
