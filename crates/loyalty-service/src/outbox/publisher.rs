//! 通知发布器

use async_trait::async_trait;
use serde_json::Value;
use tracing::info;

use loyalty_shared::kafka::KafkaProducer;

use crate::error::{PointsError, Result};

/// 外部通知通道
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, topic: &str, key: &str, payload: &Value) -> Result<()>;
}

/// Kafka 发布器
///
/// 以用户 ID 作为消息 key，同一用户的通知落在同一分区
pub struct KafkaEventPublisher {
    producer: KafkaProducer,
}

impl KafkaEventPublisher {
    pub fn new(producer: KafkaProducer) -> Self {
        Self { producer }
    }
}

#[async_trait]
impl EventPublisher for KafkaEventPublisher {
    async fn publish(&self, topic: &str, key: &str, payload: &Value) -> Result<()> {
        self.producer
            .send_json(topic, key, payload)
            .await
            .map(|_| ())
            .map_err(|e| PointsError::Publish(e.to_string()))
    }
}

/// 未启用 Kafka 时使用，只记录日志
#[derive(Debug, Default)]
pub struct LogEventPublisher;

#[async_trait]
impl EventPublisher for LogEventPublisher {
    async fn publish(&self, topic: &str, key: &str, payload: &Value) -> Result<()> {
        info!(topic, key, payload = %payload, "通知（Kafka 未启用，仅记录）");
        Ok(())
    }
}
