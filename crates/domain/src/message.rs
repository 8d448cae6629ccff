use serde::{Deserialize, Serialize};

use crate::errors::{DomainError, DomainResult};
use crate::value_objects::{MessageId, RoomId, Timestamp, UserId};

/// 消息附件，序列化为 `{"type": "image", "url": ...}` 形式。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum Attachment {
    Image {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        filename: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        size: Option<u64>,
    },
    Document {
        url: String,
        filename: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        size: Option<u64>,
    },
    File {
        url: String,
        filename: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        size: Option<u64>,
    },
    /// 分享好友名片
    Friend {
        friend_id: UserId,
        friend_username: String,
    },
    /// 分享位置
    Location {
        latitude: f64,
        longitude: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        address: Option<String>,
    },
}

impl Attachment {
    pub fn validate(&self) -> DomainResult<()> {
        match self {
            Attachment::Image { url, .. } => require_text("attachments.url", url),
            Attachment::Document { url, filename, .. } | Attachment::File { url, filename, .. } => {
                require_text("attachments.url", url)?;
                require_text("attachments.filename", filename)
            }
            Attachment::Friend {
                friend_username, ..
            } => require_text("attachments.friendUsername", friend_username),
            Attachment::Location {
                latitude,
                longitude,
                ..
            } => {
                if !latitude.is_finite() || !(-90.0..=90.0).contains(latitude) {
                    return Err(DomainError::invalid_input(
                        "attachments.latitude",
                        "must be within [-90, 90]",
                    ));
                }
                if !longitude.is_finite() || !(-180.0..=180.0).contains(longitude) {
                    return Err(DomainError::invalid_input(
                        "attachments.longitude",
                        "must be within [-180, 180]",
                    ));
                }
                Ok(())
            }
        }
    }
}

fn require_text(field: &'static str, value: &str) -> DomainResult<()> {
    if value.trim().is_empty() {
        Err(DomainError::invalid_input(field, "is required"))
    } else {
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadReceipt {
    pub user_id: UserId,
    pub read_at: Timestamp,
}

/// 房间内的一条消息。创建后只会追加已读回执。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub room_id: RoomId,
    pub sender_id: UserId,
    pub content: String,
    pub attachments: Vec<Attachment>,
    pub read_by: Vec<ReadReceipt>,
    pub created_at: Timestamp,
}

impl Message {
    /// 校验内容与附件；发送者在创建时即视为已读。
    #[allow(clippy::too_many_arguments)]
    pub fn compose(
        id: MessageId,
        room_id: RoomId,
        sender_id: UserId,
        content: String,
        attachments: Vec<Attachment>,
        created_at: Timestamp,
        max_content_chars: usize,
    ) -> DomainResult<Self> {
        if content.trim().is_empty() && attachments.is_empty() {
            return Err(DomainError::invalid_input("content", "cannot be empty"));
        }
        if content.chars().count() > max_content_chars {
            return Err(DomainError::invalid_input(
                "content",
                format!("exceeds {max_content_chars} characters"),
            ));
        }
        for attachment in &attachments {
            attachment.validate()?;
        }

        Ok(Self {
            id,
            room_id,
            sender_id,
            content,
            attachments,
            read_by: vec![ReadReceipt {
                user_id: sender_id,
                read_at: created_at,
            }],
            created_at,
        })
    }

    pub fn is_read_by(&self, user_id: UserId) -> bool {
        self.read_by.iter().any(|receipt| receipt.user_id == user_id)
    }

    /// 未读：不是自己发的，且还没有该用户的回执。
    pub fn is_unread_for(&self, user_id: UserId) -> bool {
        self.sender_id != user_id && !self.is_read_by(user_id)
    }

    /// 追加回执，已读过则返回 false。
    pub fn mark_read(&mut self, user_id: UserId, at: Timestamp) -> bool {
        if self.is_read_by(user_id) {
            return false;
        }
        self.read_by.push(ReadReceipt {
            user_id,
            read_at: at,
        });
        true
    }
}
