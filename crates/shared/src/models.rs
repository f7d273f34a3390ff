//! Shared data models for the talkline chat application.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// --- Rooms ---

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoomType {
    Direct,
    Group,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub room_type: RoomType,
    /// Most recent message in this room, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message: Option<Message>,
    #[serde(default)]
    pub unread_count: u32,
    pub created_at: DateTime<Utc>,
}

// --- Messages ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub room_id: String,
    pub sender: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub is_read: bool,
}

impl Message {
    /// Best-effort identity check for dedup across delivery paths.
    ///
    /// The realtime and fallback paths may assign ids from different spaces,
    /// so two messages are considered the same logical send when either the
    /// ids match or (timestamp, sender, content) all match.
    pub fn same_logical_send(&self, other: &Message) -> bool {
        if self.id == other.id {
            return true;
        }
        self.created_at == other.created_at
            && self.sender == other.sender
            && self.content == other.content
    }
}

// --- Requests ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CreateRoomRequest {
    pub name: String,
    pub participants: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn msg(id: &str, sender: &str, content: &str, secs: i64) -> Message {
        let ts = Utc.timestamp_opt(secs, 0).unwrap();
        Message {
            id: id.to_string(),
            room_id: "r1".to_string(),
            sender: sender.to_string(),
            content: content.to_string(),
            created_at: ts,
            updated_at: ts,
            is_read: false,
        }
    }

    #[test]
    fn same_logical_send_matches_on_id() {
        let a = msg("m1", "alice", "hi", 10);
        let b = msg("m1", "bob", "different", 20);
        assert!(a.same_logical_send(&b));
    }

    #[test]
    fn same_logical_send_matches_on_content_triple() {
        let a = msg("ws-1", "alice", "hi", 10);
        let b = msg("http-9", "alice", "hi", 10);
        assert!(a.same_logical_send(&b));
        let c = msg("http-9", "alice", "hi", 11);
        assert!(!a.same_logical_send(&c));
    }

    #[test]
    fn room_type_wire_format() {
        assert_eq!(serde_json::to_string(&RoomType::Direct).unwrap(), "\"DIRECT\"");
        assert_eq!(serde_json::to_string(&RoomType::Group).unwrap(), "\"GROUP\"");
    }
}
