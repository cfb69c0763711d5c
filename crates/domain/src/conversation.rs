use serde::{Deserialize, Serialize};

use crate::errors::{DomainError, DomainResult};
use crate::value_objects::{ConversationId, MessageId, Timestamp, UserId};

/// 单聊双方，成员顺序规范化，保证同一对用户只对应一个会话。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DirectPair {
    low: UserId,
    high: UserId,
}

impl DirectPair {
    pub fn new(a: UserId, b: UserId) -> DomainResult<Self> {
        if a == b {
            return Err(DomainError::invalid_argument(
                "receiver_id",
                "cannot send a direct message to yourself",
            ));
        }
        let (low, high) = if a < b { (a, b) } else { (b, a) };
        Ok(Self { low, high })
    }

    pub fn low(&self) -> UserId {
        self.low
    }

    pub fn high(&self) -> UserId {
        self.high
    }

    pub fn contains(&self, user: UserId) -> bool {
        self.low == user || self.high == user
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub members: DirectPair,
    pub last_message_id: Option<MessageId>,
    pub last_message_at: Option<Timestamp>,
    pub created_at: Timestamp,
}

impl Conversation {
    pub fn new_direct(id: ConversationId, members: DirectPair, created_at: Timestamp) -> Self {
        Self {
            id,
            members,
            last_message_id: None,
            last_message_at: None,
            created_at,
        }
    }

    /// 非成员读取会话内容时返回 `NotConversationMember`
    pub fn ensure_member(&self, user: UserId) -> DomainResult<()> {
        if self.members.contains(user) {
            Ok(())
        } else {
            Err(DomainError::NotConversationMember)
        }
    }
}
