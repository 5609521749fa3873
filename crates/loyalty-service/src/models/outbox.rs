//! Outbox 消息实体
//!
//! 通知与业务写入在同一事务内入队，由分发器异步投递

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::error::Result;

/// 待入队的消息
#[derive(Debug, Clone, PartialEq)]
pub struct NewOutboxMessage {
    pub id: Uuid,
    pub topic: String,
    /// Kafka 分区键，使用用户 ID 保证同一用户的消息有序
    pub message_key: String,
    pub payload: Value,
    pub trace_id: Option<String>,
}

impl NewOutboxMessage {
    pub fn json<T: Serialize>(topic: &str, key: impl Into<String>, value: &T) -> Result<Self> {
        Ok(Self {
            id: Uuid::now_v7(),
            topic: topic.to_string(),
            message_key: key.into(),
            payload: serde_json::to_value(value)?,
            trace_id: loyalty_shared::observability::tracing::current_trace_id(),
        })
    }
}

/// 已入队的消息
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct OutboxMessage {
    pub id: Uuid,
    pub topic: String,
    pub message_key: String,
    pub payload: Value,
    /// 已认领投递的次数（含本次）
    pub attempts: i32,
    pub last_error: Option<String>,
    pub trace_id: Option<String>,
    pub available_at: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub dead_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl OutboxMessage {
    pub fn from_new(message: NewOutboxMessage, now: DateTime<Utc>) -> Self {
        Self {
            id: message.id,
            topic: message.topic,
            message_key: message.message_key,
            payload: message.payload,
            attempts: 0,
            last_error: None,
            trace_id: message.trace_id,
            available_at: now,
            delivered_at: None,
            dead_at: None,
            created_at: now,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.delivered_at.is_none() && self.dead_at.is_none()
    }
}
