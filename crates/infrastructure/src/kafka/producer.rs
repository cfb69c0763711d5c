//! Kafka 消息生产者

use std::time::Duration;

use application::{EventPublisher, PublishError};
use async_trait::async_trait;
use config::KafkaConfig;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use tracing::info;

use crate::kafka::{KafkaError, KafkaResult};

/// 把复制记录写入 Kafka 主题
pub struct KafkaEventPublisher {
    producer: FutureProducer,
    topic: String,
    send_timeout: Duration,
}

impl KafkaEventPublisher {
    /// 创建生产者；只校验配置，不等待 broker 可用
    pub fn new(config: &KafkaConfig) -> KafkaResult<Self> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("message.timeout.ms", config.send_timeout_ms.to_string())
            .set("acks", "all")
            .set("enable.idempotence", "true")
            .create()
            .map_err(|e| KafkaError::ConfigError {
                message: format!("创建 Kafka 生产者失败: {}", e),
            })?;

        info!(brokers = %config.brokers, topic = %config.message_topic, "Kafka 生产者创建成功");

        Ok(Self {
            producer,
            topic: config.message_topic.clone(),
            send_timeout: config.send_timeout(),
        })
    }
}

#[async_trait]
impl EventPublisher for KafkaEventPublisher {
    async fn publish(&self, key: &str, payload: &[u8]) -> Result<(), PublishError> {
        let record = FutureRecord::to(&self.topic).key(key).payload(payload);
        self.producer
            .send(record, Timeout::After(self.send_timeout))
            .await
            .map(|_| ())
            .map_err(|(err, _message)| KafkaError::from(err).into())
    }
}
