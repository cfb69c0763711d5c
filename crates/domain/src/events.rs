//! 实时通道信封
//!
//! 双向 JSON 帧统一为 `{"type": <string>, "data": <object>}`。

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::message::{Message, MessageStatus};
use crate::value_objects::{ConversationId, MessageId, Timestamp, UserId};

/// 服务端推送给客户端的事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum RealtimeEvent {
    Message(Message),
    MessageStatus {
        message_id: MessageId,
        status: MessageStatus,
        timestamp: Timestamp,
    },
    CallInvite(Value),
    ReadReceipt {
        conversation_id: ConversationId,
        reader_id: UserId,
        read_at: Timestamp,
    },
    GroupCreated(Value),
    GroupMemberAdded(Value),
    GroupMemberRemoved(Value),
    GroupDisbanded(Value),
    Pong {
        /// Unix 秒
        timestamp: i64,
    },
}

impl RealtimeEvent {
    pub fn pong(at: Timestamp) -> Self {
        RealtimeEvent::Pong {
            timestamp: at.timestamp(),
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            RealtimeEvent::Message(_) => "message",
            RealtimeEvent::MessageStatus { .. } => "message_status",
            RealtimeEvent::CallInvite(_) => "call_invite",
            RealtimeEvent::ReadReceipt { .. } => "read_receipt",
            RealtimeEvent::GroupCreated(_) => "group_created",
            RealtimeEvent::GroupMemberAdded(_) => "group_member_added",
            RealtimeEvent::GroupMemberRemoved(_) => "group_member_removed",
            RealtimeEvent::GroupDisbanded(_) => "group_disbanded",
            RealtimeEvent::Pong { .. } => "pong",
        }
    }
}

/// 客户端发来的帧；未知类型只记录日志，不报错。
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ClientFrame {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Value,
}

impl ClientFrame {
    pub fn is_ping(&self) -> bool {
        self.kind == "ping"
    }
}
