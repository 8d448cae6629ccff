//! 实时连接上的事件协议。
//!
//! 每一帧都是 `{"event": "<name>", "data": {...}}`，字段名统一 camelCase。

use domain::{Attachment, ConnectionId, MessageId, RoomId, UserId};
use serde::{Deserialize, Serialize};

use crate::dto::{MessageView, RoomView};

/// 一条已认证连接
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Session {
    pub user_id: UserId,
    pub connection_id: ConnectionId,
}

impl Session {
    pub fn new(user_id: UserId, connection_id: ConnectionId) -> Self {
        Self {
            user_id,
            connection_id,
        }
    }
}

/// 广播的逻辑频道：个人频道或房间频道
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    User(UserId),
    Room(RoomId),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientEvent {
    JoinRoom(JoinRoomPayload),
    PrivateMessage(PrivateMessagePayload),
    GroupMessage(GroupMessagePayload),
    Typing(TypingPayload),
    MessageRead(MessageReadPayload),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRoomPayload {
    pub room_id: RoomId,
}

/// `to_user_id` 与 `room_id` 至少给一个，都给时以 `room_id` 为准
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrivateMessagePayload {
    #[serde(default)]
    pub to_user_id: Option<UserId>,
    #[serde(default)]
    pub room_id: Option<RoomId>,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub client_ref: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupMessagePayload {
    pub room_id: RoomId,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub client_ref: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingPayload {
    pub room_id: RoomId,
    pub is_typing: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageReadPayload {
    pub room_id: RoomId,
    pub message_ids: Vec<MessageId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum ServerEvent {
    NewMessage {
        room_id: RoomId,
        message: MessageView,
        /// 发送方提供的关联 id，原样回传
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_ref: Option<String>,
    },
    Typing {
        user_id: UserId,
        username: String,
        room_id: RoomId,
        is_typing: bool,
    },
    MessagesRead {
        room_id: RoomId,
        message_ids: Vec<MessageId>,
        user_id: UserId,
    },
    Presence {
        user_id: UserId,
        is_online: bool,
    },
    AddedToGroup {
        room_id: RoomId,
        room: RoomView,
    },
    RoomCreated {
        room_id: RoomId,
        room: RoomView,
    },
    RoomUpdated {
        room_id: RoomId,
        room: RoomView,
    },
    RoomDeleted {
        room_id: RoomId,
    },
    JoinedRoom {
        room_id: RoomId,
    },
    Error {
        code: String,
        message: String,
    },
}

impl ServerEvent {
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        ServerEvent::Error {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::NewMessage { .. } => "new-message",
            ServerEvent::Typing { .. } => "typing",
            ServerEvent::MessagesRead { .. } => "messages-read",
            ServerEvent::Presence { .. } => "presence",
            ServerEvent::AddedToGroup { .. } => "added-to-group",
            ServerEvent::RoomCreated { .. } => "room-created",
            ServerEvent::RoomUpdated { .. } => "room-updated",
            ServerEvent::RoomDeleted { .. } => "room-deleted",
            ServerEvent::JoinedRoom { .. } => "joined-room",
            ServerEvent::Error { .. } => "error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_private_message_by_user() {
        let to = UserId::random();
        let event: ClientEvent = serde_json::from_value(json!({
            "event": "private-message",
            "data": { "toUserId": to, "content": "hi", "clientRef": "c-1" }
        }))
        .unwrap();

        match event {
            ClientEvent::PrivateMessage(payload) => {
                assert_eq!(payload.to_user_id, Some(to));
                assert_eq!(payload.room_id, None);
                assert!(payload.attachments.is_empty());
                assert_eq!(payload.client_ref.as_deref(), Some("c-1"));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn rejects_unknown_event() {
        let result = serde_json::from_value::<ClientEvent>(json!({
            "event": "nuke-server",
            "data": {}
        }));
        assert!(result.is_err());
    }

    #[test]
    fn server_events_use_kebab_names_and_camel_fields() {
        let room_id = RoomId::random();
        let user_id = UserId::random();
        let value = serde_json::to_value(ServerEvent::MessagesRead {
            room_id,
            message_ids: vec![],
            user_id,
        })
        .unwrap();
        assert_eq!(value["event"], "messages-read");
        assert_eq!(value["data"]["roomId"], room_id.to_string());
        assert_eq!(value["data"]["userId"], user_id.to_string());

        let value = serde_json::to_value(ServerEvent::Presence {
            user_id,
            is_online: true,
        })
        .unwrap();
        assert_eq!(value["event"], "presence");
        assert_eq!(value["data"]["isOnline"], true);
    }
}
