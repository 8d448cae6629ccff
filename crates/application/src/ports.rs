//! 聊天核心依赖的外部协作方：身份认证、好友关系、用户目录、附件上传。

use async_trait::async_trait;
use domain::{RepositoryError, Timestamp, UserId, UserProfile};
use thiserror::Error;

use crate::error::ApplicationError;

/// 校验连接凭证，返回对应用户
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CredentialVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<UserId, ApplicationError>;
}

/// 好友关系（只读，对称）
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FriendshipDirectory: Send + Sync {
    async fn is_friend(&self, a: UserId, b: UserId) -> Result<bool, RepositoryError>;
    /// 在调用时刻解析，不做缓存
    async fn friends_of(&self, user_id: UserId) -> Result<Vec<UserId>, RepositoryError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// 查不到的 id 直接省略
    async fn profiles(&self, ids: &[UserId]) -> Result<Vec<UserProfile>, RepositoryError>;

    /// 在线状态的持久化镜像，下线时同时记录 last_seen
    async fn set_presence(
        &self,
        user_id: UserId,
        is_online: bool,
        at: Timestamp,
    ) -> Result<(), RepositoryError>;
}

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("file is empty")]
    Empty,
    #[error("unsupported content type: {0}")]
    UnsupportedType(String),
    #[error("file too large: {size} bytes exceeds {limit}")]
    TooLarge { size: usize, limit: usize },
    #[error("upload failed: {0}")]
    Failed(String),
}

impl UploadError {
    pub fn code(&self) -> &'static str {
        match self {
            UploadError::Empty | UploadError::UnsupportedType(_) | UploadError::TooLarge { .. } => {
                "INVALID_INPUT"
            }
            UploadError::Failed(_) => "UPLOAD_FAILED",
        }
    }
}

#[async_trait]
pub trait AttachmentUploader: Send + Sync {
    /// 返回可直接放进附件 `url` 字段的地址
    async fn upload(&self, bytes: Vec<u8>, content_type: &str) -> Result<String, UploadError>;
}
