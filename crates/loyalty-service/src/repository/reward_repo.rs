//! 奖励目录仓储

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use super::traits::RewardCatalog;
use crate::error::Result;
use crate::models::RewardCatalogEntry;

/// 奖励目录仓储
pub struct RewardRepository {
    pool: PgPool,
}

impl RewardRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<RewardCatalogEntry>> {
        let reward = sqlx::query_as::<_, RewardCatalogEntry>(
            r#"
            SELECT id, name, description, cost, segment, active, created_by, created_at
            FROM rewards_catalog
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(reward)
    }

    pub async fn list_active(&self) -> Result<Vec<RewardCatalogEntry>> {
        let rewards = sqlx::query_as::<_, RewardCatalogEntry>(
            r#"
            SELECT id, name, description, cost, segment, active, created_by, created_at
            FROM rewards_catalog
            WHERE active = TRUE
            ORDER BY cost ASC, name ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rewards)
    }

    /// 写入奖励（目录由管理端维护，此处用于初始化与测试数据）
    pub async fn create(&self, reward: &RewardCatalogEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO rewards_catalog (id, name, description, cost, segment, active, created_by, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(reward.id)
        .bind(&reward.name)
        .bind(&reward.description)
        .bind(reward.cost)
        .bind(&reward.segment)
        .bind(reward.active)
        .bind(&reward.created_by)
        .bind(reward.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl RewardCatalog for RewardRepository {
    async fn get_reward(&self, id: Uuid) -> Result<Option<RewardCatalogEntry>> {
        self.get(id).await
    }

    async fn list_active_rewards(&self) -> Result<Vec<RewardCatalogEntry>> {
        self.list_active().await
    }
}
