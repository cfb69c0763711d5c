//! Kafka 错误类型定义

use application::PublishError;
use rdkafka::types::RDKafkaErrorCode;
use thiserror::Error;

/// Kafka 操作错误
#[derive(Error, Debug)]
pub enum KafkaError {
    /// 生产者错误
    #[error("Kafka 生产者错误: {message}")]
    ProducerError { message: String },

    /// 超时错误
    #[error("操作超时: {operation}")]
    TimeoutError { operation: String },

    /// 配置错误
    #[error("配置错误: {message}")]
    ConfigError { message: String },
}

/// Kafka 结果类型
pub type KafkaResult<T> = Result<T, KafkaError>;

impl From<rdkafka::error::KafkaError> for KafkaError {
    fn from(err: rdkafka::error::KafkaError) -> Self {
        match err {
            rdkafka::error::KafkaError::ClientConfig(..) => KafkaError::ConfigError {
                message: err.to_string(),
            },
            rdkafka::error::KafkaError::MessageProduction(RDKafkaErrorCode::MessageTimedOut) => {
                KafkaError::TimeoutError {
                    operation: "produce".to_string(),
                }
            }
            _ => KafkaError::ProducerError {
                message: err.to_string(),
            },
        }
    }
}

impl From<KafkaError> for PublishError {
    fn from(err: KafkaError) -> Self {
        match err {
            KafkaError::TimeoutError { .. } => PublishError::Timeout,
            other => PublishError::Transport(other.to_string()),
        }
    }
}
