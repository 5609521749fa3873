//! 积分账本仓储
//!
//! 流水只追加；余额由 SUM 聚合得出，不存在单独维护的余额字段

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool, Row};
use tracing::instrument;
use uuid::Uuid;

use super::traits::LedgerStore;
use super::unit_of_work::PgUnitOfWork;
use crate::error::Result;
use crate::models::{PointsEvent, PointsEventType};

/// 默认的用户级锁等待上限
const DEFAULT_USER_LOCK_TIMEOUT: Duration = Duration::from_secs(2);

/// 积分账本仓储
pub struct PointsLedgerRepository {
    pool: PgPool,
    lock_timeout: Duration,
}

impl PointsLedgerRepository {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            lock_timeout: DEFAULT_USER_LOCK_TIMEOUT,
        }
    }

    /// 排队等待用户锁的请求各占一个连接；`Duration::ZERO` 表示不限
    pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// 在事务中获取用户级排他锁
    ///
    /// 事务级 advisory lock 随提交或回滚自动释放。`lock_timeout` 只在本事务内生效，
    /// 超时返回 55P03（lock_not_available），映射为可重试的 Database 错误
    pub async fn lock_user_in_tx(
        tx: &mut PgConnection,
        user_id: Uuid,
        lock_timeout: Duration,
    ) -> Result<()> {
        sqlx::query("SELECT set_config('lock_timeout', $1, true)")
            .bind(lock_timeout_setting(lock_timeout))
            .execute(&mut *tx)
            .await?;

        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
            .bind(user_id.to_string())
            .execute(tx)
            .await?;
        Ok(())
    }

    /// 在事务中写入流水
    pub async fn insert_in_tx(tx: &mut PgConnection, event: &PointsEvent) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO points_events (id, user_id, event_type, ref_id, points, metadata, occurred_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(event.id)
        .bind(event.user_id)
        .bind(event.event_type)
        .bind(&event.ref_id)
        .bind(event.points)
        .bind(&event.metadata)
        .bind(event.occurred_at)
        .execute(tx)
        .await?;

        Ok(())
    }

    /// 在事务中计算余额（包含本事务已写入的流水）
    pub async fn balance_in_tx(tx: &mut PgConnection, user_id: Uuid) -> Result<i64> {
        let row = sqlx::query(
            r#"
            SELECT COALESCE(SUM(points), 0)::BIGINT AS balance
            FROM points_events
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_one(tx)
        .await?;

        Ok(row.get("balance"))
    }

    /// 在事务中统计自 since 起的累计积分
    pub async fn accrued_since_in_tx(
        tx: &mut PgConnection,
        user_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<i64> {
        let row = sqlx::query(
            r#"
            SELECT COALESCE(SUM(points), 0)::BIGINT AS accrued
            FROM points_events
            WHERE user_id = $1
              AND occurred_at >= $2
              AND points > 0
              AND event_type NOT IN ($3, $4)
            "#,
        )
        .bind(user_id)
        .bind(since)
        .bind(PointsEventType::Redemption)
        .bind(PointsEventType::RedemptionRefund)
        .fetch_one(tx)
        .await?;

        Ok(row.get("accrued"))
    }
}

#[async_trait]
impl LedgerStore for PointsLedgerRepository {
    type Uow = PgUnitOfWork;

    #[instrument(skip(self))]
    async fn begin(&self, user_id: Uuid) -> Result<PgUnitOfWork> {
        let mut tx = self.pool.begin().await?;
        Self::lock_user_in_tx(&mut tx, user_id, self.lock_timeout).await?;
        Ok(PgUnitOfWork::new(user_id, tx))
    }

    async fn balance_of(&self, user_id: Uuid) -> Result<i64> {
        let row = sqlx::query(
            r#"
            SELECT COALESCE(SUM(points), 0)::BIGINT AS balance
            FROM points_events
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get("balance"))
    }

    async fn list_events(&self, user_id: Uuid, limit: i64) -> Result<Vec<PointsEvent>> {
        let events = sqlx::query_as::<_, PointsEvent>(
            r#"
            SELECT id, user_id, event_type, ref_id, points, metadata, occurred_at
            FROM points_events
            WHERE user_id = $1
            ORDER BY occurred_at DESC, id DESC
            LIMIT $2
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(events)
    }
}

/// PostgreSQL `lock_timeout` 取值，0 即不限
fn lock_timeout_setting(timeout: Duration) -> String {
    format!("{}ms", timeout.as_millis())
}
