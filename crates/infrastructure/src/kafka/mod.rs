//! Kafka 消息复制通道
//!
//! 以消息 id 为 key 把消息记录写入事件日志主题。

pub mod error;
pub mod producer;

pub use error::{KafkaError, KafkaResult};
pub use producer::KafkaEventPublisher;
