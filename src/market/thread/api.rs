//! Chat thread & message HTTP API client.
//!
//! Thin REST wrapper over `/api/v1/chat-threads` and `/api/v1/chat-messages`.
//! Failures propagate as `Err`; there is no retry here, recovery belongs to
//! the caller.

use crate::market::thread::models::{ChatMessage, ChatThread, NewMessage, NewThread};
use crate::market::types::{handle_http_response, SenderType};
use anyhow::{Context, Result};
use tracing::{debug, info};
use uuid::Uuid;

pub struct ThreadApi {
    client: reqwest::Client,
    api_base_url: String,
    user_id: String,
    user_type: SenderType,
}

impl ThreadApi {
    /// `client` carries the shared request timeout; see `MarketClient`.
    pub fn new(
        client: reqwest::Client,
        api_base_url: String,
        user_id: String,
        user_type: SenderType,
    ) -> Self {
        Self {
            client,
            api_base_url,
            user_id,
            user_type,
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn user_type(&self) -> SenderType {
        self.user_type
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v1{}", self.api_base_url.trim_end_matches('/'), path)
    }

    /// List every thread the local user participates in.
    pub async fn list_threads(&self) -> Result<Vec<ChatThread>> {
        let url = self.url("/chat-threads");
        let side = match self.user_type {
            SenderType::Buyer => "buyer_id",
            SenderType::Seller => "seller_id",
        };
        debug!("[ThreadAPI] 📡 listing threads for {}={}", side, self.user_id);

        let response = self
            .client
            .get(&url)
            .query(&[(side, self.user_id.as_str())])
            .send()
            .await
            .context("list threads request failed")?;
        let resp = handle_http_response::<Vec<ChatThread>>(response, "list threads").await?;
        Ok(resp.data.unwrap_or_default())
    }

    /// Explicit start-chat call. The backend returns the existing thread when
    /// one already links this buyer and seller.
    pub async fn start_thread(&self, seller_id: &str) -> Result<ChatThread> {
        let url = self.url("/chat-threads");
        let body = NewThread {
            buyer_id: self.user_id.clone(),
            seller_id: seller_id.to_string(),
        };
        info!(
            "[ThreadAPI] 📡 starting thread buyer={} seller={}",
            body.buyer_id, body.seller_id
        );

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .context("start thread request failed")?;
        let resp = handle_http_response::<ChatThread>(response, "start thread").await?;
        resp.data
            .ok_or_else(|| anyhow::anyhow!("start thread: response carried no data"))
    }

    /// One page of message history, oldest first.
    pub async fn get_messages(
        &self,
        thread_id: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<ChatMessage>> {
        let url = self.url("/chat-messages");
        debug!(
            "[ThreadAPI] 📡 loading messages thread={} offset={} limit={}",
            thread_id, offset, limit
        );

        let response = self
            .client
            .get(&url)
            .query(&[
                ("thread_id", thread_id),
                ("offset", &offset.to_string()),
                ("limit", &limit.to_string()),
            ])
            .send()
            .await
            .context("get messages request failed")?;
        let resp = handle_http_response::<Vec<ChatMessage>>(response, "get messages").await?;
        Ok(resp.data.unwrap_or_default())
    }

    /// Persist one message. The returned copy is authoritative (server id
    /// and timestamp) and replaces the optimistic local one.
    pub async fn send_message(&self, message: &NewMessage) -> Result<ChatMessage> {
        let url = self.url("/chat-messages");
        debug!(
            "[ThreadAPI] 📡 sending message thread={} id={}",
            message.thread_id, message.id
        );

        let response = self
            .client
            .post(&url)
            .json(message)
            .send()
            .await
            .context("send message request failed")?;
        let resp = handle_http_response::<ChatMessage>(response, "send message").await?;
        resp.data
            .ok_or_else(|| anyhow::anyhow!("send message: response carried no data"))
    }

    /// Mark every message addressed to the local user in `thread_id` read.
    pub async fn mark_read(&self, thread_id: &str) -> Result<()> {
        let url = self.url("/chat-messages/mark-read");
        debug!("[ThreadAPI] 📡 marking thread {} read", thread_id);

        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({
                "thread_id": thread_id,
                "user_id": self.user_id,
                "user_type": self.user_type,
            }))
            .send()
            .await
            .context("mark read request failed")?;
        handle_http_response::<serde_json::Value>(response, "mark read").await?;
        Ok(())
    }

    /// Convenience for optimistic sends: fresh client UUID, local sender.
    pub fn new_local_message(&self, thread_id: &str, text: &str) -> NewMessage {
        NewMessage {
            id: Uuid::new_v4().to_string(),
            thread_id: thread_id.to_string(),
            sender_id: self.user_id.clone(),
            sender_type: self.user_type,
            message: text.to_string(),
        }
    }
}
