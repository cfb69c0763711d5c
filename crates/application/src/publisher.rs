//! 异步复制通道（事件日志）抽象

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use domain::Message;

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("failed to serialize record: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("publish failed: {0}")]
    Transport(String),
    #[error("publish timed out")]
    Timeout,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, key: &str, payload: &[u8]) -> Result<(), PublishError>;
}

/// 关闭复制时使用
#[derive(Debug, Default)]
pub struct NoopEventPublisher;

#[async_trait]
impl EventPublisher for NoopEventPublisher {
    async fn publish(&self, _key: &str, _payload: &[u8]) -> Result<(), PublishError> {
        Ok(())
    }
}

/// 写入事件日志的消息记录，时间为 unix 秒
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationRecord {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub receiver_id: Option<String>,
    pub content: String,
    #[serde(rename = "type")]
    pub message_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_url: Option<String>,
    pub created_at: i64,
}

impl From<&Message> for ReplicationRecord {
    fn from(message: &Message) -> Self {
        Self {
            id: message.id.to_string(),
            conversation_id: message.conversation_id.to_string(),
            sender_id: message.sender_id.to_string(),
            receiver_id: message.receiver_id.map(|id| id.to_string()),
            content: message.content.clone(),
            message_type: message.message_type.as_str().to_string(),
            file_url: message.attachment.as_ref().map(|a| a.file_url.clone()),
            created_at: message.created_at.timestamp(),
        }
    }
}

impl ReplicationRecord {
    /// 记录以消息 id 为 key
    pub fn key(&self) -> &str {
        &self.id
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, PublishError> {
        Ok(serde_json::to_vec(self)?)
    }
}
