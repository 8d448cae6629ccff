use serde::{Deserialize, Serialize};

use crate::value_objects::UserId;

/// 由外部用户目录提供的展示信息，聊天核心只读。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: UserId,
    pub display_name: String,
    pub avatar_url: Option<String>,
}

impl UserProfile {
    /// 目录里查不到的用户用 id 占位，消息仍然可以展示。
    pub fn placeholder(id: UserId) -> Self {
        Self {
            id,
            display_name: id.to_string(),
            avatar_url: None,
        }
    }
}
