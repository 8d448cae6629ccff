use domain::{DomainError, RepositoryError};
use thiserror::Error;

use crate::broadcaster::BroadcastError;
use crate::ports::UploadError;
use crate::repository::RoomChangeError;

#[derive(Debug, Error)]
pub enum ApplicationError {
    #[error("{0}")]
    Domain(#[from] DomainError),
    #[error("repository error: {0}")]
    Repository(RepositoryError),
    #[error("broadcast error: {0}")]
    Broadcast(#[from] BroadcastError),
    #[error("upload error: {0}")]
    Upload(#[from] UploadError),
    #[error("authentication failed")]
    Authentication,
    #[error("infrastructure error: {0}")]
    Infrastructure(String),
}

impl ApplicationError {
    /// 创建基础设施错误
    pub fn infrastructure(message: impl Into<String>) -> Self {
        ApplicationError::Infrastructure(message.into())
    }

    /// 稳定错误码，HTTP 响应体与实时 error 事件共用
    pub fn code(&self) -> &'static str {
        match self {
            ApplicationError::Domain(err) => err.code(),
            ApplicationError::Repository(RepositoryError::NotFound) => "NOT_FOUND",
            ApplicationError::Repository(RepositoryError::Conflict) => "CONFLICT",
            ApplicationError::Repository(RepositoryError::Storage { .. }) => "STORAGE_UNAVAILABLE",
            ApplicationError::Broadcast(_) => "BROADCAST_FAILED",
            ApplicationError::Upload(err) => err.code(),
            ApplicationError::Authentication => "AUTHENTICATION_FAILED",
            ApplicationError::Infrastructure(_) => "INTERNAL",
        }
    }

    /// 面向客户端的说明，存储层细节不外泄
    pub fn public_message(&self) -> String {
        match self {
            ApplicationError::Repository(RepositoryError::Storage { .. })
            | ApplicationError::Infrastructure(_) => "internal server error".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<RepositoryError> for ApplicationError {
    fn from(value: RepositoryError) -> Self {
        ApplicationError::Repository(value)
    }
}

impl From<RoomChangeError> for ApplicationError {
    fn from(value: RoomChangeError) -> Self {
        match value {
            RoomChangeError::Rejected(err) => ApplicationError::Domain(err),
            RoomChangeError::Repository(err) => ApplicationError::Repository(err),
        }
    }
}
