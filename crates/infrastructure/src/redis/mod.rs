//! Redis 适配器
//!
//! 目前只有离线消息队列。

pub mod error;
pub mod offline_queue;

pub use error::{RedisError, RedisResult};
pub use offline_queue::RedisOfflineQueue;
