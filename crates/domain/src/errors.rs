//! 领域模型错误定义
//!
//! 校验类错误（撤回窗口、非发送者撤回、接收者不存在）与存储错误分开定义，
//! 上层据此决定哪些错误需要透传给调用方。

use thiserror::Error;

use crate::message::MessageStatus;

/// 领域模型错误类型
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// 参数非法
    #[error("invalid argument {field}: {reason}")]
    InvalidArgument { field: String, reason: String },

    /// 用户不存在（例如接收者）
    #[error("user not found")]
    UserNotFound,

    /// 消息不存在
    #[error("message not found")]
    MessageNotFound,

    /// 会话不存在
    #[error("conversation not found")]
    ConversationNotFound,

    /// 只有会话成员可以读取会话内容
    #[error("not a member of this conversation")]
    NotConversationMember,

    /// 只能撤回自己发送的消息
    #[error("can only recall your own messages")]
    NotMessageSender,

    /// 超过撤回时间窗口
    #[error("can only recall messages within {window_secs} seconds")]
    RecallWindowExpired { window_secs: i64 },

    /// 状态机不允许的状态迁移
    #[error("illegal status transition {from} -> {to}")]
    InvalidStatusTransition {
        from: MessageStatus,
        to: MessageStatus,
    },
}

impl DomainError {
    pub fn invalid_argument(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// 领域模型结果类型
pub type DomainResult<T> = Result<T, DomainError>;

/// 存储层错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    #[error("record not found")]
    NotFound,

    #[error("record conflict")]
    Conflict,

    #[error("storage error: {message}")]
    Storage { message: String },
}

impl RepositoryError {
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }
}
