pub mod market;

// Re-export the types most callers need, so `use timber_market_sdk::...`
// works without digging through modules.
pub use market::{
    client::{ClientConfig, MarketClient},
    socket::{ChatSocketManager, FrameHandler, SocketConfig, SocketListener, SocketState},
    thread::{ChatMessage, ChatThread, SessionState, ThreadListener, ThreadSession},
    types::{ChatFrame, OutboundFrame, SenderType},
};
