use domain::{
    Attachment, ConversationRoom, Message, MessageId, ReadReceipt, RoomId, RoomKind, Timestamp,
    UserId, UserProfile,
};
use serde::{Deserialize, Serialize};

/// 带在线状态的成员信息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberView {
    #[serde(flatten)]
    pub profile: UserProfile,
    pub is_online: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageView {
    pub id: MessageId,
    pub room_id: RoomId,
    pub sender: UserProfile,
    pub content: String,
    pub attachments: Vec<Attachment>,
    pub read_by: Vec<ReadReceipt>,
    pub created_at: Timestamp,
}

impl MessageView {
    pub fn new(message: Message, sender: UserProfile) -> Self {
        Self {
            id: message.id,
            room_id: message.room_id,
            sender,
            content: message.content,
            attachments: message.attachments,
            read_by: message.read_by,
            created_at: message.created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomView {
    pub id: RoomId,
    pub kind: RoomKind,
    pub name: Option<String>,
    pub admin: Option<UserId>,
    pub managers: Vec<UserId>,
    pub members: Vec<MemberView>,
    pub created_at: Timestamp,
    pub last_activity_at: Timestamp,
}

impl RoomView {
    /// `members` 需与房间成员同序
    pub fn new(room: ConversationRoom, members: Vec<MemberView>) -> Self {
        Self {
            id: room.id,
            kind: room.kind,
            name: room.name,
            admin: room.admin,
            managers: room.managers,
            members,
            created_at: room.created_at,
            last_activity_at: room.last_activity_at,
        }
    }
}

/// 房间列表条目
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSummary {
    #[serde(flatten)]
    pub room: RoomView,
    pub unread_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePage {
    /// 时间正序
    pub messages: Vec<MessageView>,
    pub has_more: bool,
    pub next_cursor: Option<Timestamp>,
}
