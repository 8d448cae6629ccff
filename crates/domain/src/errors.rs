//! 领域模型错误定义
//!
//! 覆盖房间目录、消息存储的全部业务失败，调用方据此决定是回给发送者还是断开连接。

use thiserror::Error;

/// 领域模型错误类型
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// 双方不是好友，不能建立私聊
    #[error("users are not friends")]
    NotFriends,

    /// 已认证但无权执行该操作
    #[error("unauthorized: {action}")]
    Unauthorized { action: String },

    /// 资源不存在
    #[error("{resource} not found: {id}")]
    NotFound { resource: &'static str, id: String },

    /// 输入校验失败
    #[error("invalid input: {field}: {reason}")]
    InvalidInput { field: &'static str, reason: String },

    /// 状态冲突（重复经理、并发建房等）
    #[error("conflict: {reason}")]
    Conflict { reason: String },

    /// 群主不能退出群，只能解散
    #[error("group admin cannot leave the group")]
    AdminCannotLeave,

    /// 目标用户不是房间成员
    #[error("user is not a member of this room")]
    NotAMember,

    /// 违反结构不变量的操作（降级群主、对私聊设经理等）
    #[error("invalid operation: {reason}")]
    InvalidOperation { reason: String },
}

impl DomainError {
    pub fn unauthorized(action: impl Into<String>) -> Self {
        Self::Unauthorized {
            action: action.into(),
        }
    }

    pub fn not_found(resource: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            resource,
            id: id.to_string(),
        }
    }

    pub fn invalid_input(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            field,
            reason: reason.into(),
        }
    }

    pub fn conflict(reason: impl Into<String>) -> Self {
        Self::Conflict {
            reason: reason.into(),
        }
    }

    pub fn invalid_operation(reason: impl Into<String>) -> Self {
        Self::InvalidOperation {
            reason: reason.into(),
        }
    }

    /// 稳定的机器可读错误码，HTTP 与实时 error 事件共用
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFriends => "NOT_FRIENDS",
            Self::Unauthorized { .. } => "UNAUTHORIZED",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::InvalidInput { .. } => "INVALID_INPUT",
            Self::Conflict { .. } => "CONFLICT",
            Self::AdminCannotLeave => "ADMIN_CANNOT_LEAVE",
            Self::NotAMember => "NOT_A_MEMBER",
            Self::InvalidOperation { .. } => "INVALID_OPERATION",
        }
    }
}

/// 仓储层错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    #[error("record not found")]
    NotFound,
    #[error("record conflicts with an existing one")]
    Conflict,
    #[error("storage failure: {message}")]
    Storage { message: String },
}

impl RepositoryError {
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }
}

/// 领域模型结果类型
pub type DomainResult<T> = Result<T, DomainError>;
