//! 兑换记录仓储

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use super::traits::RedemptionStore;
use crate::error::Result;
use crate::models::{Redemption, RedemptionStatus};

/// 兑换记录仓储
pub struct RedemptionRepository {
    pool: PgPool,
}

impl RedemptionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<Redemption>> {
        let redemption = sqlx::query_as::<_, Redemption>(
            r#"
            SELECT id, user_id, reward_id, points_spent, status, created_at, updated_at
            FROM redemptions
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(redemption)
    }

    pub async fn list_by_user(&self, user_id: Uuid, limit: i64) -> Result<Vec<Redemption>> {
        let redemptions = sqlx::query_as::<_, Redemption>(
            r#"
            SELECT id, user_id, reward_id, points_spent, status, created_at, updated_at
            FROM redemptions
            WHERE user_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(redemptions)
    }

    /// 查询超时未履约的兑换
    pub async fn list_pending_older_than(&self, cutoff: DateTime<Utc>) -> Result<Vec<Redemption>> {
        let redemptions = sqlx::query_as::<_, Redemption>(
            r#"
            SELECT id, user_id, reward_id, points_spent, status, created_at, updated_at
            FROM redemptions
            WHERE status = $1 AND created_at < $2
            ORDER BY created_at ASC
            "#,
        )
        .bind(RedemptionStatus::Pending)
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        Ok(redemptions)
    }

    /// 在事务中创建兑换记录
    pub async fn insert_in_tx(tx: &mut PgConnection, redemption: &Redemption) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO redemptions (id, user_id, reward_id, points_spent, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(redemption.id)
        .bind(redemption.user_id)
        .bind(redemption.reward_id)
        .bind(redemption.points_spent)
        .bind(redemption.status)
        .bind(redemption.created_at)
        .bind(redemption.updated_at)
        .execute(tx)
        .await?;

        Ok(())
    }

    /// 在事务中做条件状态迁移
    ///
    /// 当前状态不是 `from` 时不更新任何行，返回 None
    pub async fn update_status_in_tx(
        tx: &mut PgConnection,
        id: Uuid,
        from: RedemptionStatus,
        to: RedemptionStatus,
        now: DateTime<Utc>,
    ) -> Result<Option<Redemption>> {
        let updated = sqlx::query_as::<_, Redemption>(
            r#"
            UPDATE redemptions
            SET status = $3, updated_at = $4
            WHERE id = $1 AND status = $2
            RETURNING id, user_id, reward_id, points_spent, status, created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(from)
        .bind(to)
        .bind(now)
        .fetch_optional(tx)
        .await?;

        Ok(updated)
    }
}

#[async_trait]
impl RedemptionStore for RedemptionRepository {
    async fn get_redemption(&self, id: Uuid) -> Result<Option<Redemption>> {
        self.get(id).await
    }

    async fn list_redemptions_by_user(&self, user_id: Uuid, limit: i64) -> Result<Vec<Redemption>> {
        self.list_by_user(user_id, limit).await
    }

    async fn get_pending_older_than(&self, cutoff: DateTime<Utc>) -> Result<Vec<Redemption>> {
        self.list_pending_older_than(cutoff).await
    }
}
