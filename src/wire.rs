//! Wire contract for the WebSocket transport. Event names are part of the
//! protocol; payloads are JSON objects under `data`.

use crate::model::{ImageMeta, MessageOut};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Events a client may send.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientEvent {
    UserConnected { user_id: Uuid },
    JoinRoom { room_id: Uuid },
    LeaveRoom { room_id: Uuid },
    SendMessage(SendMessage),
    Typing { room_id: Uuid, user_id: Uuid, username: String },
    StopTyping { room_id: Uuid, user_id: Uuid },
}

/// Inbound `send-message` payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SendMessage {
    #[serde(default)]
    pub content: Option<String>,
    pub room_id: Uuid,
    pub user_id: Uuid,
    #[serde(default)]
    pub image: Option<ImageMeta>,
}

/// Events the server emits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    NewMessage(MessageOut),
    UserStatusChanged { user_id: Uuid, is_online: bool },
    UserTyping { user_id: Uuid, username: String },
    UserStopTyping { user_id: Uuid },
    MessageError { error: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_names_match_the_contract() {
        let ev = ClientEvent::UserConnected {
            user_id: Uuid::nil(),
        };
        let v: serde_json::Value = serde_json::to_value(&ev).unwrap();
        assert_eq!(v["event"], "user-connected");

        let ev = ClientEvent::SendMessage(SendMessage {
            content: Some("hi".into()),
            room_id: Uuid::nil(),
            user_id: Uuid::nil(),
            image: None,
        });
        let v = serde_json::to_value(&ev).unwrap();
        assert_eq!(v["event"], "send-message");
        assert_eq!(v["data"]["content"], "hi");

        let ev = ServerEvent::UserStatusChanged {
            user_id: Uuid::nil(),
            is_online: true,
        };
        let v = serde_json::to_value(&ev).unwrap();
        assert_eq!(v["event"], "user-status-changed");
        assert_eq!(v["data"]["is_online"], true);

        let v = serde_json::to_value(ServerEvent::MessageError {
            error: "Room not found".into(),
        })
        .unwrap();
        assert_eq!(v["event"], "message-error");
    }

    #[test]
    fn client_events_parse_from_json() {
        let room = Uuid::new_v4();
        let raw = format!(r#"{{"event":"join-room","data":{{"room_id":"{room}"}}}}"#);
        let ev: ClientEvent = serde_json::from_str(&raw).unwrap();
        assert_eq!(ev, ClientEvent::JoinRoom { room_id: room });

        let user = Uuid::new_v4();
        let raw = format!(
            r#"{{"event":"send-message","data":{{"room_id":"{room}","user_id":"{user}"}}}}"#
        );
        let ev: ClientEvent = serde_json::from_str(&raw).unwrap();
        match ev {
            ClientEvent::SendMessage(m) => {
                assert_eq!(m.room_id, room);
                assert!(m.content.is_none());
                assert!(m.image.is_none());
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
}
