use serde::{Deserialize, Serialize};
use tracing::{debug, error};

/// Which side of a buyer–seller conversation a participant belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SenderType {
    Buyer,
    Seller,
}

impl SenderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SenderType::Buyer => "buyer",
            SenderType::Seller => "seller",
        }
    }

    /// The opposite side of the conversation.
    pub fn other(&self) -> SenderType {
        match self {
            SenderType::Buyer => SenderType::Seller,
            SenderType::Seller => SenderType::Buyer,
        }
    }
}

impl std::fmt::Display for SenderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SenderType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "buyer" => Ok(SenderType::Buyer),
            "seller" => Ok(SenderType::Seller),
            other => Err(anyhow::anyhow!("unknown sender type: {}", other)),
        }
    }
}

/// Inbound WebSocket frame, one JSON object per frame, tagged by `type`.
///
/// Every payload field is optional with a default so that frames from older
/// or newer backend builds still parse; handlers receive the frame as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatFrame {
    Message {
        #[serde(default)]
        id: Option<String>,
        #[serde(default)]
        thread_id: Option<String>,
        #[serde(default)]
        sender_id: Option<String>,
        #[serde(default)]
        sender_type: Option<SenderType>,
        message: String,
        #[serde(default)]
        created_at: Option<chrono::DateTime<chrono::Utc>>,
    },
    Typing {
        #[serde(default)]
        user_id: Option<String>,
    },
    StopTyping {
        #[serde(default)]
        user_id: Option<String>,
    },
    UserJoined {
        #[serde(default)]
        user_id: Option<String>,
    },
    UserLeft {
        #[serde(default)]
        user_id: Option<String>,
    },
    Ping,
    Pong,
}

/// Outbound WebSocket frame. The backend derives the sender from the
/// connection's query parameters, so only the payload travels here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundFrame {
    Message { message: String },
    Typing,
    StopTyping,
    Ping,
}

/// Envelope used by every REST endpoint: payload under `data`, list
/// endpoints add `total`, errors come back as `detail`.
///
/// `data` may be null or missing, hence the `Option<T>`.
#[derive(Debug, Deserialize)]
pub struct ApiResponse<T> {
    pub data: Option<T>,
    #[serde(default)]
    pub total: Option<i64>,
    #[serde(default)]
    pub detail: Option<String>,
}

/// Shared HTTP response handling: status check, deserialization, backend
/// `detail` error surfacing. All REST API clients go through this.
pub async fn handle_http_response<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
    operation_name: &str,
) -> anyhow::Result<ApiResponse<T>> {
    use anyhow::Context;

    let status = response.status();
    let body_bytes = response
        .bytes()
        .await
        .with_context(|| format!("{}: failed to read response body", operation_name))?;

    if !status.is_success() {
        let body_str = String::from_utf8_lossy(&body_bytes);
        error!(
            "[HTTP] {} failed, status: {}, body: {}",
            operation_name, status, body_str
        );
        return Err(anyhow::anyhow!(
            "HTTP error {} on {}: {}",
            status,
            operation_name,
            body_str
        ));
    }
    debug!("[HTTP] {} succeeded, status: {}", operation_name, status);

    let api_resp: ApiResponse<T> = serde_json::from_slice(&body_bytes).map_err(|e| {
        error!(
            "[HTTP] {} deserialization failed: {}, raw body: {}",
            operation_name,
            e,
            String::from_utf8_lossy(&body_bytes)
        );
        anyhow::anyhow!("failed to deserialize {} response: {}", operation_name, e)
    })?;

    if let Some(detail) = &api_resp.detail {
        error!("[HTTP] {} backend error: {}", operation_name, detail);
        return Err(anyhow::anyhow!(
            "backend error on {}: {}",
            operation_name,
            detail
        ));
    }

    Ok(api_resp)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_message_frame() {
        let frame: ChatFrame = serde_json::from_str(r#"{"type":"message","message":"hi"}"#)
            .expect("minimal message frame must parse");
        match frame {
            ChatFrame::Message {
                message,
                id,
                sender_id,
                ..
            } => {
                assert_eq!(message, "hi");
                assert!(id.is_none());
                assert!(sender_id.is_none());
            }
            other => panic!("expected message frame, got {:?}", other),
        }
    }

    #[test]
    fn parses_full_message_frame() {
        let raw = r#"{
            "type": "message",
            "id": "8b0f4a1e-0000-4000-8000-000000000001",
            "thread_id": "t1",
            "sender_id": "u2",
            "sender_type": "seller",
            "message": "boards are in stock",
            "created_at": "2024-05-01T12:00:00Z"
        }"#;
        let frame: ChatFrame = serde_json::from_str(raw).unwrap();
        match frame {
            ChatFrame::Message {
                sender_type,
                thread_id,
                created_at,
                ..
            } => {
                assert_eq!(sender_type, Some(SenderType::Seller));
                assert_eq!(thread_id.as_deref(), Some("t1"));
                assert!(created_at.is_some());
            }
            other => panic!("expected message frame, got {:?}", other),
        }
    }

    #[test]
    fn parses_control_frames() {
        assert_eq!(
            serde_json::from_str::<ChatFrame>(r#"{"type":"ping"}"#).unwrap(),
            ChatFrame::Ping
        );
        assert_eq!(
            serde_json::from_str::<ChatFrame>(r#"{"type":"typing","user_id":"u2"}"#).unwrap(),
            ChatFrame::Typing {
                user_id: Some("u2".to_string())
            }
        );
        assert_eq!(
            serde_json::from_str::<ChatFrame>(r#"{"type":"user_left","user_id":"u2"}"#).unwrap(),
            ChatFrame::UserLeft {
                user_id: Some("u2".to_string())
            }
        );
    }

    #[test]
    fn outbound_frames_serialize_tagged() {
        let json = serde_json::to_string(&OutboundFrame::Message {
            message: "hello".to_string(),
        })
        .unwrap();
        assert_eq!(json, r#"{"type":"message","message":"hello"}"#);
        assert_eq!(
            serde_json::to_string(&OutboundFrame::Ping).unwrap(),
            r#"{"type":"ping"}"#
        );
    }

    #[test]
    fn sender_type_round_trip() {
        assert_eq!(serde_json::to_string(&SenderType::Buyer).unwrap(), r#""buyer""#);
        assert_eq!(
            serde_json::from_str::<SenderType>(r#""seller""#).unwrap(),
            SenderType::Seller
        );
        assert_eq!(SenderType::Buyer.other(), SenderType::Seller);
        assert_eq!("buyer".parse::<SenderType>().unwrap(), SenderType::Buyer);
        assert!("admin".parse::<SenderType>().is_err());
    }
}
