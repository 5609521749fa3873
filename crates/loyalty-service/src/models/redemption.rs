//! 兑换实体定义

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::RedemptionStatus;

/// 兑换记录
///
/// `points_spent` 在创建时冻结为奖励当时的价格，之后不随目录变化
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Redemption {
    pub id: Uuid,
    pub user_id: Uuid,
    pub reward_id: Uuid,
    pub points_spent: i64,
    pub status: RedemptionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Redemption {
    /// 新建 PENDING 兑换
    pub fn pending(user_id: Uuid, reward_id: Uuid, points_spent: i64, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::now_v7(),
            user_id,
            reward_id,
            points_spent,
            status: RedemptionStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    /// 是否已超过待履约时限
    pub fn is_stale(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        self.status == RedemptionStatus::Pending && self.created_at < now - ttl
    }
}

/// 一次过期清扫的结果
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExpirySummary {
    /// 查询到的超时 PENDING 记录数
    pub scanned: usize,
    /// 本次置为 EXPIRED 的记录数
    pub expired: usize,
    /// 已被其他流程处理（不再是 PENDING）而跳过的记录数
    pub skipped: usize,
    /// 更新失败的记录
    pub failed: Vec<Uuid>,
}

impl ExpirySummary {
    /// 本次过期的数量
    pub fn count(&self) -> usize {
        self.expired
    }
}
