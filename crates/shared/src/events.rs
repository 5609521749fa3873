//! 通知事件模型
//!
//! 定义积分系统对外发布的通知负载。字段名使用 snake_case，
//! 与下游消费者约定的 JSON 结构保持一致；消费者按 event_id / redemption_id 去重。

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// `user-points-updated` 负载：一次账本写入
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserPointsUpdated {
    pub user_id: Uuid,
    pub event_id: Uuid,
    /// 带符号的积分变动量
    pub points: i64,
    pub event_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

/// `redemption-created` 负载：一次兑换创建
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedemptionCreated {
    pub redemption_id: Uuid,
    pub user_id: Uuid,
    pub reward_id: Uuid,
    pub points_spent: i64,
    pub status: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_points_updated_omits_missing_session() {
        let event = UserPointsUpdated {
            user_id: Uuid::nil(),
            event_id: Uuid::nil(),
            points: 70,
            event_type: "CHARGE_KWH".to_string(),
            session_id: None,
        };

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["points"], json!(70));
        assert!(value.get("session_id").is_none());
    }

    #[test]
    fn test_redemption_created_shape() {
        let value = serde_json::to_value(RedemptionCreated {
            redemption_id: Uuid::nil(),
            user_id: Uuid::nil(),
            reward_id: Uuid::nil(),
            points_spent: 500,
            status: "PENDING".to_string(),
        })
        .unwrap();

        let mut keys: Vec<_> = value.as_object().unwrap().keys().cloned().collect();
        keys.sort();
        assert_eq!(
            keys,
            vec!["points_spent", "redemption_id", "reward_id", "status", "user_id"]
        );
    }
}
