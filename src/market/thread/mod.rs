//! Chat thread module: REST client, models, listener, and the session
//! orchestration that ties them to the socket manager.

pub mod api;
pub mod listener;
pub mod models;
pub mod service;

pub use api::ThreadApi;
pub use listener::{EmptyThreadListener, ThreadListener};
pub use models::{ChatMessage, ChatThread, NewMessage, NewThread};
pub use service::{SessionState, ThreadSession, Timeline};
