use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A chat user. Created on first successful external authentication and
/// never deleted; the online flag and last-seen timestamp are mutated on
/// every connect/disconnect.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct User {
    pub id: Uuid,
    pub provider_id: String,
    pub name: String,
    pub avatar_url: Option<String>,
    pub is_online: bool,
    pub last_seen: i64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Room {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub is_default: bool,
    pub is_active: bool,
    pub created_by: Option<Uuid>,
    pub created_at: i64,
}

/// Room with member display names resolved, as served over HTTP.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RoomSummary {
    #[serde(flatten)]
    pub room: Room,
    pub members: Vec<MemberRef>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct MemberRef {
    pub id: Uuid,
    pub name: String,
}

/// Descriptor for an uploaded image attached to a message.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ImageMeta {
    pub filename: String,
    pub original_name: String,
    pub mimetype: String,
    pub size: i64,
    pub url: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Image,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Text => "text",
            MessageKind::Image => "image",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "image" => MessageKind::Image,
            _ => MessageKind::Text,
        }
    }
}

/// A persisted chat message. Immutable once created; the edited fields are
/// reserved and never mutated here. Destroyed only when its room is deleted.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: Uuid,
    pub room_id: Uuid,
    pub user_id: Uuid,
    pub content: Option<String>,
    pub kind: MessageKind,
    pub image: Option<ImageMeta>,
    pub is_edited: bool,
    pub edited_at: Option<i64>,
    pub created_at: i64,
}

/// Message with author display fields resolved, as broadcast to clients.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct MessageOut {
    #[serde(flatten)]
    pub message: Message,
    pub author_name: String,
    pub author_avatar: Option<String>,
}
