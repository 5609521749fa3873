//! 奖励目录实体
//!
//! 目录由管理端维护，积分服务只读

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct RewardCatalogEntry {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    /// 兑换所需积分
    pub cost: i64,
    /// 目标人群（可见性过滤由上游负责）
    pub segment: Option<Value>,
    pub active: bool,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl RewardCatalogEntry {
    pub fn new(name: impl Into<String>, cost: i64) -> Self {
        Self {
            id: Uuid::now_v7(),
            name: name.into(),
            description: None,
            cost,
            segment: None,
            active: true,
            created_by: None,
            created_at: Utc::now(),
        }
    }
}
