//! 服务层请求与响应

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::models::{Redemption, RedemptionStatus};

/// 积分累计请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccrualRequest {
    pub user_id: String,
    pub event_type: String,
    /// 会话 ID，写入流水的 ref_id
    #[serde(default)]
    pub session_id: Option<String>,
    /// 事件负载，如 `{"unit_amount": 7}` 或 `{"streak_days": 3}`
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub metadata: Option<Value>,
}

impl AccrualRequest {
    pub fn new(user_id: impl Into<String>, event_type: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            event_type: event_type.into(),
            session_id: None,
            payload: Value::Null,
            metadata: None,
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// 积分累计响应
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccrualResponse {
    pub event_id: Uuid,
    /// 实际入账积分（可能被每日上限裁剪）
    pub points: i64,
    pub session_id: Option<String>,
}

/// 兑换请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedeemRequest {
    pub user_id: String,
    pub reward_id: String,
}

impl RedeemRequest {
    pub fn new(user_id: impl ToString, reward_id: impl ToString) -> Self {
        Self {
            user_id: user_id.to_string(),
            reward_id: reward_id.to_string(),
        }
    }
}

/// 兑换响应
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedeemResponse {
    pub redemption_id: Uuid,
    pub points_spent: i64,
    pub status: RedemptionStatus,
}

impl From<&Redemption> for RedeemResponse {
    fn from(redemption: &Redemption) -> Self {
        Self {
            redemption_id: redemption.id,
            points_spent: redemption.points_spent,
            status: redemption.status,
        }
    }
}
