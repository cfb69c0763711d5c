//! 基础设施层实现。
//!
//! 提供 Postgres 仓储、Redis 离线队列和 Kafka 事件发布等适配器，实现应用层定义的接口。

pub mod kafka;
pub mod migrations;
pub mod redis;
pub mod repository;

pub use self::kafka::{KafkaError, KafkaEventPublisher};
pub use migrations::MIGRATOR;
pub use self::redis::{RedisError, RedisOfflineQueue};
pub use repository::{
    create_pg_pool, PgConversationRepository, PgMessageRepository, PgStorage, PgUserDirectory,
};
