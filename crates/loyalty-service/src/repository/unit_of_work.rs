//! PostgreSQL 工作单元
//!
//! 持有一个已获取用户 advisory lock 的事务；丢弃时事务回滚

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Postgres, Transaction};
use tracing::debug;
use uuid::Uuid;

use super::ledger_repo::PointsLedgerRepository;
use super::outbox_repo::OutboxRepository;
use super::redemption_repo::RedemptionRepository;
use super::traits::UnitOfWork;
use crate::error::{PointsError, Result};
use crate::models::{NewOutboxMessage, PointsEvent, Redemption, RedemptionStatus};

#[derive(Debug)]
pub struct PgUnitOfWork {
    user_id: Uuid,
    tx: Transaction<'static, Postgres>,
}

impl PgUnitOfWork {
    pub(crate) fn new(user_id: Uuid, tx: Transaction<'static, Postgres>) -> Self {
        Self { user_id, tx }
    }

    fn ensure_owner(&self, user_id: Uuid) -> Result<()> {
        if user_id != self.user_id {
            return Err(PointsError::Internal(format!(
                "工作单元属于用户 {}，不能写入用户 {} 的数据",
                self.user_id, user_id
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl UnitOfWork for PgUnitOfWork {
    fn user_id(&self) -> Uuid {
        self.user_id
    }

    async fn balance(&mut self) -> Result<i64> {
        PointsLedgerRepository::balance_in_tx(&mut self.tx, self.user_id).await
    }

    async fn accrued_since(&mut self, since: DateTime<Utc>) -> Result<i64> {
        PointsLedgerRepository::accrued_since_in_tx(&mut self.tx, self.user_id, since).await
    }

    async fn append_event(&mut self, event: &PointsEvent) -> Result<()> {
        self.ensure_owner(event.user_id)?;
        PointsLedgerRepository::insert_in_tx(&mut self.tx, event).await
    }

    async fn insert_redemption(&mut self, redemption: &Redemption) -> Result<()> {
        self.ensure_owner(redemption.user_id)?;
        RedemptionRepository::insert_in_tx(&mut self.tx, redemption).await
    }

    async fn update_redemption_status(
        &mut self,
        id: Uuid,
        from: RedemptionStatus,
        to: RedemptionStatus,
        now: DateTime<Utc>,
    ) -> Result<Option<Redemption>> {
        let updated =
            RedemptionRepository::update_status_in_tx(&mut self.tx, id, from, to, now).await?;
        if let Some(redemption) = &updated {
            // 出错时事务随工作单元一起回滚
            self.ensure_owner(redemption.user_id)?;
        }
        Ok(updated)
    }

    async fn enqueue(&mut self, message: NewOutboxMessage) -> Result<()> {
        OutboxRepository::enqueue_in_tx(&mut self.tx, &message).await
    }

    async fn commit(self) -> Result<()> {
        self.tx.commit().await?;
        debug!(user_id = %self.user_id, "工作单元已提交");
        Ok(())
    }
}
