//! Kafka 基础设施封装
//!
//! 将 rdkafka 的底层 API 封装为业务友好的 Producer 抽象，
//! 统一消息序列化与错误映射。积分服务只生产通知，不消费 Kafka。

use std::time::Duration;

use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};
use serde::Serialize;
use tracing::{debug, info};

use crate::config::KafkaConfig;
use crate::error::LoyaltyError;

// ---------------------------------------------------------------------------
// Topic 常量
// ---------------------------------------------------------------------------

/// 集中管理所有 Kafka topic 名称，防止字符串散落在各处导致拼写不一致
pub mod topics {
    /// 账本写入后通知下游积分变更
    pub const USER_POINTS_UPDATED: &str = "user-points-updated";
    /// 兑换创建后通知履约方
    pub const REDEMPTION_CREATED: &str = "redemption-created";
}

// ---------------------------------------------------------------------------
// KafkaProducer
// ---------------------------------------------------------------------------

/// 面向业务的 Kafka 生产者
///
/// 封装 `FutureProducer` 并提供 JSON 发送方法，
/// 内部已派生 Clone（`FutureProducer` 本身是 Arc 包装的）。
#[derive(Clone)]
pub struct KafkaProducer {
    producer: FutureProducer,
    timeout: Duration,
}

impl KafkaProducer {
    /// 根据配置创建生产者
    ///
    /// 开启幂等生产，同一 key 的消息在分区内保持写入顺序。
    pub fn new(config: &KafkaConfig) -> Result<Self, LoyaltyError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("message.timeout.ms", config.message_timeout_ms.to_string())
            .set("enable.idempotence", "true")
            .create()
            .map_err(|e| LoyaltyError::Kafka(format!("创建生产者失败: {e}")))?;

        info!(brokers = %config.brokers, "Kafka 生产者已初始化");
        Ok(Self {
            producer,
            timeout: Duration::from_millis(config.message_timeout_ms),
        })
    }

    /// 发送原始字节消息
    pub async fn send(
        &self,
        topic: &str,
        key: &str,
        payload: &[u8],
    ) -> Result<(i32, i64), LoyaltyError> {
        let record = FutureRecord::to(topic).key(key).payload(payload);

        // rdkafka 0.39+ 返回 Delivery 结构体而非元组
        let delivery = self
            .producer
            .send(record, self.timeout)
            .await
            .map_err(|(e, _)| LoyaltyError::Kafka(format!("发送消息失败: {e}")))?;

        debug!(
            topic,
            key,
            partition = delivery.partition,
            offset = delivery.offset,
            "消息已发送"
        );
        Ok((delivery.partition, delivery.offset))
    }

    /// 将值序列化为 JSON 后发送
    pub async fn send_json<T: Serialize>(
        &self,
        topic: &str,
        key: &str,
        value: &T,
    ) -> Result<(i32, i64), LoyaltyError> {
        let payload = serde_json::to_vec(value)
            .map_err(|e| LoyaltyError::Kafka(format!("序列化失败: {e}")))?;

        self.send(topic, key, &payload).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_names() {
        assert_eq!(topics::USER_POINTS_UPDATED, "user-points-updated");
        assert_eq!(topics::REDEMPTION_CREATED, "redemption-created");
    }

    #[test]
    fn test_producer_creation_does_not_connect() {
        // librdkafka 延迟建连，创建阶段不会因 broker 不可达而失败
        let config = KafkaConfig::default();
        assert!(KafkaProducer::new(&config).is_ok());
    }
}
