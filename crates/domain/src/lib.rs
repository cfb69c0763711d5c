//! 实时消息投递核心领域模型
//!
//! 包含消息及其状态机、会话、目录用户、设备标识以及实时推送信封等类型。

pub mod conversation;
pub mod errors;
pub mod events;
pub mod message;
pub mod user;
pub mod value_objects;

// 重新导出常用类型
pub use conversation::{Conversation, DirectPair};
pub use errors::{DomainError, DomainResult, RepositoryError};
pub use events::{ClientFrame, RealtimeEvent};
pub use message::{Attachment, Message, MessageStatus, MessageType};
pub use user::{AuthenticatedUser, DirectoryUser, UserRole};
pub use value_objects::{ConnectionId, ConversationId, DeviceLabel, MessageId, Timestamp, UserId};
