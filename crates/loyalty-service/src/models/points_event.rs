//! 积分流水实体
//!
//! 流水只能追加，不可修改或删除；用户余额 = 该用户全部流水 points 之和。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::enums::PointsEventType;

/// 已持久化的积分流水
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct PointsEvent {
    pub id: Uuid,
    pub user_id: Uuid,
    pub event_type: PointsEventType,
    /// 关联 ID：累计为会话 ID，兑换与退还为兑换 ID
    pub ref_id: Option<String>,
    /// 带符号的积分变动
    pub points: i64,
    pub metadata: Option<Value>,
    pub occurred_at: DateTime<Utc>,
}

/// 待写入的积分流水
///
/// ID 与发生时间由账本在写入时分配
#[derive(Debug, Clone, PartialEq)]
pub struct PointsEventDraft {
    pub user_id: Uuid,
    pub event_type: PointsEventType,
    pub ref_id: Option<String>,
    pub points: i64,
    pub metadata: Option<Value>,
}

impl PointsEventDraft {
    pub fn new(user_id: Uuid, event_type: PointsEventType, points: i64) -> Self {
        Self {
            user_id,
            event_type,
            ref_id: None,
            points,
            metadata: None,
        }
    }

    pub fn with_ref(mut self, ref_id: impl Into<String>) -> Self {
        self.ref_id = Some(ref_id.into());
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// 分配身份与服务端时间戳
    pub fn into_event(self, occurred_at: DateTime<Utc>) -> PointsEvent {
        PointsEvent {
            id: Uuid::now_v7(),
            user_id: self.user_id,
            event_type: self.event_type,
            ref_id: self.ref_id,
            points: self.points,
            metadata: self.metadata,
            occurred_at,
        }
    }
}
