//! 应用层实现。
//!
//! 在线连接注册表（Hub）、按来源限流、消息投递流水线，以及它们依赖的
//! 存储、离线队列和事件日志抽象。`memory` 模块提供进程内实现。

pub mod clock;
pub mod error;
pub mod hub;
pub mod memory;
pub mod offline;
pub mod paging;
pub mod publisher;
pub mod rate_limiter;
pub mod repository;
pub mod retry;
pub mod services;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::ApplicationError;
pub use hub::{ConnectionHandle, EnqueueError, Hub, HubError, RealtimeHub};
pub use offline::OfflineQueue;
pub use paging::PageRequest;
pub use publisher::{EventPublisher, NoopEventPublisher, PublishError, ReplicationRecord};
pub use rate_limiter::{RateLimitError, RateLimiter};
pub use repository::{ConversationRepository, MessagePage, MessageRepository, UserDirectory};
pub use retry::{retry_async, Backoff, RetryConfig};
pub use services::{DeliveryPolicy, DeliveryService, DeliveryServiceDependencies, SendMessageRequest};
