//! Realtime wire protocol: frame envelopes and destination naming.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::Message;

/// Envelope wrapping every frame on the realtime transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WsEnvelope<T> {
    pub id: String,
    #[serde(flatten)]
    pub payload: T,
    pub ts: DateTime<Utc>,
}

impl<T> WsEnvelope<T> {
    pub fn new(payload: T) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            payload,
            ts: Utc::now(),
        }
    }
}

/// Frames the client publishes to the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum ClientFrame {
    /// Register interest in a destination (the per-user message queue).
    Subscribe { destination: String },
    #[serde(rename = "message.create")]
    MessageCreate { room_id: String, content: String },
    Typing { room_id: String, is_typing: bool },
}

/// Frames the server pushes to the client.
///
/// The `type` tag is the discriminator distinguishing chat messages from
/// typing events.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum ServerFrame {
    #[serde(rename = "message.new")]
    MessageNew { message: Message },
    Typing {
        room_id: String,
        username: String,
        is_typing: bool,
    },
}

/// Per-user inbound queue destination.
pub fn user_queue(user_id: &str) -> String {
    format!("/user/{user_id}/queue/messages")
}

/// Per-room outbound send destination.
pub fn room_send(room_id: &str) -> String {
    format!("/room/{room_id}/send")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn destinations() {
        assert_eq!(user_queue("42"), "/user/42/queue/messages");
        assert_eq!(room_send("7"), "/room/7/send");
    }

    #[test]
    fn server_frame_discriminator_round_trip() {
        let ts = Utc.timestamp_opt(1000, 0).unwrap();
        let envelope = WsEnvelope {
            id: "e1".to_string(),
            payload: ServerFrame::Typing {
                room_id: "r1".to_string(),
                username: "alice".to_string(),
                is_typing: true,
            },
            ts,
        };
        let json = serde_json::to_string(&envelope).unwrap();
        assert!(json.contains("\"type\":\"typing\""));

        let back: WsEnvelope<ServerFrame> = serde_json::from_str(&json).unwrap();
        match back.payload {
            ServerFrame::Typing { room_id, username, is_typing } => {
                assert_eq!(room_id, "r1");
                assert_eq!(username, "alice");
                assert!(is_typing);
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn message_new_parses_from_tagged_json() {
        let json = r#"{
            "id": "e2",
            "type": "message.new",
            "data": {
                "message": {
                    "id": "m1",
                    "roomId": "r1",
                    "sender": "bob",
                    "content": "hello",
                    "createdAt": "2024-01-01T00:00:00Z",
                    "updatedAt": "2024-01-01T00:00:00Z",
                    "isRead": false
                }
            },
            "ts": "2024-01-01T00:00:01Z"
        }"#;
        let envelope: WsEnvelope<ServerFrame> = serde_json::from_str(json).unwrap();
        match envelope.payload {
            ServerFrame::MessageNew { message } => {
                assert_eq!(message.id, "m1");
                assert_eq!(message.room_id, "r1");
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}
