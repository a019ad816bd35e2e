//! Chat thread and message data structures.

use crate::market::types::{ChatFrame, SenderType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One buyer–seller conversation container.
///
/// Created via an explicit start-chat call or discovered via listing; the
/// client never deletes threads.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatThread {
    pub id: String,
    pub buyer_id: String,
    pub seller_id: String,
    #[serde(default)]
    pub last_message: Option<String>,
    #[serde(default)]
    pub unread_count: i64,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// One message inside a thread.
///
/// `id` is a client-generated UUID on optimistic sends until the server copy
/// replaces it (the backend may keep the client id or assign its own).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub id: String,
    pub thread_id: String,
    pub sender_id: String,
    pub sender_type: SenderType,
    pub message: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub is_read_by_buyer: bool,
    #[serde(default)]
    pub is_read_by_seller: bool,
}

impl ChatMessage {
    /// Build a message from an inbound `message` frame, filling gaps the
    /// backend leaves (older builds omit ids and timestamps).
    pub fn from_frame(thread_id: &str, frame: &ChatFrame) -> Option<ChatMessage> {
        let ChatFrame::Message {
            id,
            thread_id: frame_thread,
            sender_id,
            sender_type,
            message,
            created_at,
        } = frame
        else {
            return None;
        };
        let sender_type = sender_type.unwrap_or(SenderType::Seller);
        Some(ChatMessage {
            id: id
                .clone()
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            thread_id: frame_thread
                .clone()
                .unwrap_or_else(|| thread_id.to_string()),
            sender_id: sender_id.clone().unwrap_or_default(),
            sender_type,
            message: message.clone(),
            created_at: created_at.unwrap_or_else(Utc::now),
            is_read_by_buyer: sender_type == SenderType::Buyer,
            is_read_by_seller: sender_type == SenderType::Seller,
        })
    }
}

/// Request body for sending a message.
#[derive(Debug, Clone, Serialize)]
pub struct NewMessage {
    /// Client-generated UUID; the server may keep it or assign its own.
    pub id: String,
    pub thread_id: String,
    pub sender_id: String,
    pub sender_type: SenderType,
    pub message: String,
}

/// Request body for starting a thread.
#[derive(Debug, Clone, Serialize)]
pub struct NewThread {
    pub buyer_id: String,
    pub seller_id: String,
}
