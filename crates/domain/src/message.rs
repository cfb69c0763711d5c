use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::{DomainError, DomainResult};
use crate::value_objects::{ConversationId, MessageId, Timestamp, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Text,
    Image,
    Voice,
    Video,
    File,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Text => "text",
            MessageType::Image => "image",
            MessageType::Voice => "voice",
            MessageType::Video => "video",
            MessageType::File => "file",
        }
    }
}

impl FromStr for MessageType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(MessageType::Text),
            "image" => Ok(MessageType::Image),
            "voice" => Ok(MessageType::Voice),
            "video" => Ok(MessageType::Video),
            "file" => Ok(MessageType::File),
            other => Err(DomainError::invalid_argument(
                "type",
                format!("unknown message type `{other}`"),
            )),
        }
    }
}

/// 消息投递状态机
///
/// `sent → delivered → read` 单调推进，`sent → read` 允许（未收到送达确认就已读），
/// `recalled` 只能从 `sent` / `delivered` 进入，且为终态。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Sent,
    Delivered,
    Read,
    Recalled,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Sent => "sent",
            MessageStatus::Delivered => "delivered",
            MessageStatus::Read => "read",
            MessageStatus::Recalled => "recalled",
        }
    }

    /// 可以迁移到 `target` 的前置状态集合，存储层据此做条件更新。
    pub fn allowed_predecessors(target: MessageStatus) -> &'static [MessageStatus] {
        match target {
            MessageStatus::Sent => &[],
            MessageStatus::Delivered => &[MessageStatus::Sent],
            MessageStatus::Read => &[
                MessageStatus::Sent,
                MessageStatus::Delivered,
                MessageStatus::Read,
            ],
            MessageStatus::Recalled => &[MessageStatus::Sent, MessageStatus::Delivered],
        }
    }

    pub fn can_transition_to(&self, target: MessageStatus) -> bool {
        Self::allowed_predecessors(target).contains(self)
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sent" => Ok(MessageStatus::Sent),
            "delivered" => Ok(MessageStatus::Delivered),
            "read" => Ok(MessageStatus::Read),
            "recalled" => Ok(MessageStatus::Recalled),
            other => Err(DomainError::invalid_argument(
                "status",
                format!("unknown message status `{other}`"),
            )),
        }
    }
}

/// 文件 / 媒体附件引用
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub file_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<i64>,
    /// 语音 / 视频时长（秒）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    /// 群消息没有单一接收者
    pub receiver_id: Option<UserId>,
    pub content: String,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    #[serde(flatten)]
    pub attachment: Option<Attachment>,
    pub status: MessageStatus,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Message {
    /// 创建一条单聊消息，初始状态为 `sent`。
    #[allow(clippy::too_many_arguments)]
    pub fn new_direct(
        id: MessageId,
        conversation_id: ConversationId,
        sender_id: UserId,
        receiver_id: UserId,
        content: impl Into<String>,
        message_type: MessageType,
        attachment: Option<Attachment>,
        created_at: Timestamp,
    ) -> DomainResult<Self> {
        let content = content.into();
        Self::validate_payload(&content, attachment.as_ref())?;

        Ok(Self {
            id,
            conversation_id,
            sender_id,
            receiver_id: Some(receiver_id),
            content,
            message_type,
            attachment,
            status: MessageStatus::Sent,
            created_at,
            updated_at: created_at,
        })
    }

    /// 文本为空时必须带附件，附件地址不能为空
    pub fn validate_payload(content: &str, attachment: Option<&Attachment>) -> DomainResult<()> {
        if content.trim().is_empty() && attachment.is_none() {
            return Err(DomainError::invalid_argument("content", "cannot be empty"));
        }
        if let Some(attachment) = attachment {
            if attachment.file_url.trim().is_empty() {
                return Err(DomainError::invalid_argument("file_url", "cannot be empty"));
            }
        }
        Ok(())
    }

    /// 撤回前的纯校验：发送者、时间窗口、当前状态。
    pub fn ensure_recallable(
        &self,
        requester: UserId,
        now: Timestamp,
        window: chrono::Duration,
    ) -> DomainResult<()> {
        if self.sender_id != requester {
            return Err(DomainError::NotMessageSender);
        }
        if now - self.created_at > window {
            return Err(DomainError::RecallWindowExpired {
                window_secs: window.num_seconds(),
            });
        }
        if !self.status.can_transition_to(MessageStatus::Recalled) {
            return Err(DomainError::InvalidStatusTransition {
                from: self.status,
                to: MessageStatus::Recalled,
            });
        }
        Ok(())
    }

    /// 按状态机推进状态，返回状态是否真的发生了变化。
    pub fn transition_to(&mut self, target: MessageStatus, at: Timestamp) -> DomainResult<bool> {
        if !self.status.can_transition_to(target) {
            return Err(DomainError::InvalidStatusTransition {
                from: self.status,
                to: target,
            });
        }
        if self.status == target {
            return Ok(false);
        }
        self.status = target;
        self.updated_at = at;
        Ok(true)
    }

    /// 对 `user` 而言的会话另一方
    pub fn counterpart_of(&self, user: UserId) -> Option<UserId> {
        if self.sender_id == user {
            self.receiver_id
        } else if self.receiver_id == Some(user) {
            Some(self.sender_id)
        } else {
            None
        }
    }
}
