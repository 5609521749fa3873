//! 兑换服务
//!
//! 处理积分兑换奖励的核心业务逻辑，包括：
//! - 奖励有效性检查
//! - 按用户串行的余额检查与扣减
//! - 兑换记录与扣减流水同一工作单元提交
//! - 超时未履约兑换的过期清扫
//!
//! ## 兑换流程
//!
//! 1. 解析奖励 -> 2. 取用户锁并读取余额 -> 3. 余额校验
//!    -> 4. 写兑换记录 + 扣减流水 + 通知入队 -> 5. 截止时间复检后提交

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::json;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use loyalty_shared::config::RedemptionConfig;
use loyalty_shared::events::RedemptionCreated;
use loyalty_shared::kafka::topics;
use loyalty_shared::observability::metrics;

use super::dto::{RedeemRequest, RedeemResponse};
use super::ledger_service::Ledger;
use crate::error::{PointsError, Result, parse_id};
use crate::models::{
    ExpirySummary, NewOutboxMessage, PointsEventDraft, PointsEventType, Redemption,
    RedemptionStatus, RewardCatalogEntry,
};
use crate::repository::{LedgerStore, RedemptionStore, RewardCatalog, UnitOfWork};

/// 兑换服务
pub struct RedemptionService<S: LedgerStore> {
    ledger: Ledger<S>,
    catalog: Arc<dyn RewardCatalog>,
    redemptions: Arc<dyn RedemptionStore>,
    config: RedemptionConfig,
}

impl<S: LedgerStore> RedemptionService<S> {
    pub fn new(
        ledger: Ledger<S>,
        catalog: Arc<dyn RewardCatalog>,
        redemptions: Arc<dyn RedemptionStore>,
        config: RedemptionConfig,
    ) -> Self {
        Self {
            ledger,
            catalog,
            redemptions,
            config,
        }
    }

    pub fn config(&self) -> &RedemptionConfig {
        &self.config
    }

    /// 兑换奖励，截止时间取 `request_timeout_ms`
    pub async fn redeem(&self, request: RedeemRequest) -> Result<RedeemResponse> {
        let deadline = Instant::now() + self.config.request_timeout();
        self.redeem_before(request, deadline).await
    }

    /// 在调用方给定的截止时间内兑换
    ///
    /// 截止时间覆盖取锁、读余额和暂存写入，提交前再检查一次；提交本身不受截止时间约束，
    /// 已确认的提交不会被撤销。
    #[instrument(skip(self, request), fields(user_id = %request.user_id, reward_id = %request.reward_id))]
    pub async fn redeem_before(
        &self,
        request: RedeemRequest,
        deadline: Instant,
    ) -> Result<RedeemResponse> {
        let started = std::time::Instant::now();
        let result = self.execute_redemption(&request, deadline).await;

        let status = match &result {
            Ok(_) => "success",
            Err(PointsError::InsufficientPoints { .. }) => "insufficient",
            Err(PointsError::DeadlineExceeded) => "timeout",
            Err(e) if e.is_business_error() => "rejected",
            Err(_) => "error",
        };
        metrics::record_redemption(status, started.elapsed().as_secs_f64());

        result
    }

    async fn execute_redemption(
        &self,
        request: &RedeemRequest,
        deadline: Instant,
    ) -> Result<RedeemResponse> {
        let user_id = parse_id("user_id", &request.user_id)?;
        let reward_id = parse_id("reward_id", &request.reward_id)?;

        let (uow, redemption) =
            tokio::time::timeout_at(deadline, self.stage_redemption(user_id, reward_id))
                .await
                .map_err(|_| PointsError::DeadlineExceeded)??;

        // 丢弃工作单元即回滚
        if Instant::now() >= deadline {
            warn!(redemption_id = %redemption.id, "提交前已超过截止时间，放弃兑换");
            return Err(PointsError::DeadlineExceeded);
        }

        uow.commit().await?;
        self.ledger.signal().notify();

        info!(
            redemption_id = %redemption.id,
            points_spent = redemption.points_spent,
            "兑换成功"
        );
        Ok(RedeemResponse::from(&redemption))
    }

    /// 在用户锁内完成余额校验与全部写入，返回未提交的工作单元
    async fn stage_redemption(&self, user_id: Uuid, reward_id: Uuid) -> Result<(S::Uow, Redemption)> {
        let reward = self.validate_reward(reward_id).await?;

        let mut uow = self.ledger.begin(user_id).await?;
        let available = uow.balance().await?;
        if available < reward.cost {
            debug!(required = reward.cost, available, "积分余额不足");
            return Err(PointsError::InsufficientPoints {
                required: reward.cost,
                available,
            });
        }

        let redemption = Redemption::pending(user_id, reward.id, reward.cost, Utc::now());
        uow.insert_redemption(&redemption).await?;

        let debit = PointsEventDraft::new(user_id, PointsEventType::Redemption, -reward.cost)
            .with_ref(redemption.id.to_string())
            .with_metadata(json!({ "reward_id": reward.id, "reward_name": reward.name }));
        self.ledger.append_in(&mut uow, debit).await?;

        let created = RedemptionCreated {
            redemption_id: redemption.id,
            user_id,
            reward_id: reward.id,
            points_spent: redemption.points_spent,
            status: redemption.status.as_str().to_string(),
        };
        uow.enqueue(NewOutboxMessage::json(
            topics::REDEMPTION_CREATED,
            user_id.to_string(),
            &created,
        )?)
        .await?;

        Ok((uow, redemption))
    }

    async fn validate_reward(&self, reward_id: Uuid) -> Result<RewardCatalogEntry> {
        let reward = self
            .catalog
            .get_reward(reward_id)
            .await?
            .ok_or(PointsError::RewardNotFound(reward_id))?;

        if !reward.active {
            return Err(PointsError::RewardInactive(reward_id));
        }
        if reward.cost < 0 {
            return Err(PointsError::Internal(format!(
                "奖励 {} 的积分价格为负数: {}",
                reward_id, reward.cost
            )));
        }
        Ok(reward)
    }

    /// 过期清扫
    ///
    /// 将创建时间早于 `now - pending_ttl` 的 PENDING 兑换置为 EXPIRED。
    /// 每条记录独立提交：单条失败只记录在结果中，不影响其余记录；
    /// 已被其他流程处理的记录计入 skipped。重复执行不会产生额外更新。
    #[instrument(skip(self))]
    pub async fn expire_stale(&self, now: DateTime<Utc>) -> Result<ExpirySummary> {
        let ttl = self.config.pending_ttl();
        let stale = self.redemptions.get_pending_older_than(now - ttl).await?;

        let mut summary = ExpirySummary {
            scanned: stale.len(),
            ..ExpirySummary::default()
        };

        for redemption in &stale {
            if !redemption.is_stale(now, ttl) {
                summary.skipped += 1;
                continue;
            }
            match self.expire_one(redemption, now).await {
                Ok(true) => summary.expired += 1,
                Ok(false) => summary.skipped += 1,
                Err(e) => {
                    error!(
                        redemption_id = %redemption.id,
                        user_id = %redemption.user_id,
                        error = %e,
                        "兑换过期处理失败"
                    );
                    summary.failed.push(redemption.id);
                }
            }
        }

        if summary.expired > 0 && self.config.refund_on_expire {
            self.ledger.signal().notify();
        }
        metrics::record_expiry(summary.expired as u64, summary.failed.len() as u64);

        info!(
            scanned = summary.scanned,
            expired = summary.expired,
            skipped = summary.skipped,
            failed = summary.failed.len(),
            refund = self.config.refund_on_expire,
            "过期清扫完成"
        );
        Ok(summary)
    }

    /// 过期单条兑换，返回是否实际更新
    async fn expire_one(&self, redemption: &Redemption, now: DateTime<Utc>) -> Result<bool> {
        let mut uow = self.ledger.begin(redemption.user_id).await?;

        let Some(expired) = uow
            .update_redemption_status(
                redemption.id,
                RedemptionStatus::Pending,
                RedemptionStatus::Expired,
                now,
            )
            .await?
        else {
            debug!(redemption_id = %redemption.id, "兑换已不是 PENDING，跳过");
            return Ok(false);
        };

        if self.config.refund_on_expire {
            let refund = PointsEventDraft::new(
                expired.user_id,
                PointsEventType::RedemptionRefund,
                expired.points_spent,
            )
            .with_ref(expired.id.to_string());
            self.ledger.append_in(&mut uow, refund).await?;
        }

        uow.commit().await?;
        Ok(true)
    }

    /// 履约：PENDING -> FULFILLED
    #[instrument(skip(self))]
    pub async fn fulfill(&self, redemption_id: Uuid) -> Result<Redemption> {
        let current = self.get_redemption(redemption_id).await?;
        if !current.status.can_transition_to(RedemptionStatus::Fulfilled) {
            return Err(PointsError::InvalidRedemptionStatus {
                redemption_id,
                current_status: current.status.to_string(),
            });
        }

        let mut uow = self.ledger.begin(current.user_id).await?;
        let updated = uow
            .update_redemption_status(
                redemption_id,
                RedemptionStatus::Pending,
                RedemptionStatus::Fulfilled,
                Utc::now(),
            )
            .await?;

        match updated {
            Some(redemption) => {
                uow.commit().await?;
                info!(redemption_id = %redemption_id, "兑换已履约");
                Ok(redemption)
            }
            None => {
                drop(uow);
                let status = self
                    .redemptions
                    .get_redemption(redemption_id)
                    .await?
                    .map(|r| r.status)
                    .unwrap_or(current.status);
                Err(PointsError::InvalidRedemptionStatus {
                    redemption_id,
                    current_status: status.to_string(),
                })
            }
        }
    }

    /// 可兑换的奖励
    pub async fn list_rewards(&self) -> Result<Vec<RewardCatalogEntry>> {
        self.catalog.list_active_rewards().await
    }

    pub async fn get_redemption(&self, redemption_id: Uuid) -> Result<Redemption> {
        self.redemptions
            .get_redemption(redemption_id)
            .await?
            .ok_or(PointsError::RedemptionNotFound(redemption_id))
    }

    /// 用户兑换记录，新的在前
    pub async fn list_user_redemptions(&self, user_id: &str, limit: i64) -> Result<Vec<Redemption>> {
        let user_id = parse_id("user_id", user_id)?;
        self.redemptions
            .list_redemptions_by_user(user_id, limit)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outbox::OutboxSignal;
    use crate::repository::{MemoryLoyaltyStore, MemoryUnitOfWork, MockRedemptionStore, MockRewardCatalog};
    use async_trait::async_trait;
    use chrono::Duration;

    fn config() -> RedemptionConfig {
        RedemptionConfig::default()
    }

    fn with_catalog(
        catalog: MockRewardCatalog,
    ) -> (RedemptionService<MemoryLoyaltyStore>, Arc<MemoryLoyaltyStore>) {
        let store = Arc::new(MemoryLoyaltyStore::new());
        let ledger = Ledger::new(store.clone(), OutboxSignal::new());
        let service = RedemptionService::new(
            ledger,
            Arc::new(catalog),
            Arc::new(MockRedemptionStore::new()),
            config(),
        );
        (service, store)
    }

    #[tokio::test]
    async fn test_missing_reward() {
        let mut catalog = MockRewardCatalog::new();
        catalog.expect_get_reward().returning(|_| Ok(None));
        let (service, store) = with_catalog(catalog);

        let reward_id = Uuid::now_v7();
        let err = service
            .redeem(RedeemRequest::new(Uuid::now_v7(), reward_id))
            .await
            .unwrap_err();

        assert!(matches!(err, PointsError::RewardNotFound(id) if id == reward_id));
        assert!(store.redemptions().is_empty());
    }

    #[tokio::test]
    async fn test_inactive_reward() {
        let mut reward = RewardCatalogEntry::new("咖啡券", 100);
        reward.active = false;
        let mut catalog = MockRewardCatalog::new();
        catalog
            .expect_get_reward()
            .returning(move |_| Ok(Some(reward.clone())));
        let (service, store) = with_catalog(catalog);

        let err = service
            .redeem(RedeemRequest::new(Uuid::now_v7(), Uuid::now_v7()))
            .await
            .unwrap_err();

        assert!(matches!(err, PointsError::RewardInactive(_)));
        assert!(store.events().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_ids_are_validation_errors() {
        let mut catalog = MockRewardCatalog::new();
        catalog.expect_get_reward().never();
        let (service, _) = with_catalog(catalog);

        let err = service
            .redeem(RedeemRequest::new("bad", Uuid::now_v7()))
            .await
            .unwrap_err();
        assert!(matches!(err, PointsError::Validation(_)));
    }

    #[tokio::test]
    async fn test_fulfill_unknown_redemption() {
        let mut redemptions = MockRedemptionStore::new();
        redemptions.expect_get_redemption().returning(|_| Ok(None));

        let store = Arc::new(MemoryLoyaltyStore::new());
        let service = RedemptionService::new(
            Ledger::new(store, OutboxSignal::new()),
            Arc::new(MockRewardCatalog::new()),
            Arc::new(redemptions),
            config(),
        );

        let err = service.fulfill(Uuid::now_v7()).await.unwrap_err();
        assert!(matches!(err, PointsError::RedemptionNotFound(_)));
    }

    /// 对指定用户开启工作单元失败的存储
    struct FlakyStore {
        inner: MemoryLoyaltyStore,
        broken_user: Uuid,
    }

    #[async_trait]
    impl LedgerStore for FlakyStore {
        type Uow = MemoryUnitOfWork;

        async fn begin(&self, user_id: Uuid) -> Result<MemoryUnitOfWork> {
            if user_id == self.broken_user {
                return Err(PointsError::Database(sqlx::Error::PoolTimedOut));
            }
            self.inner.begin(user_id).await
        }

        async fn balance_of(&self, user_id: Uuid) -> Result<i64> {
            self.inner.balance_of(user_id).await
        }

        async fn list_events(&self, user_id: Uuid, limit: i64) -> Result<Vec<crate::models::PointsEvent>> {
            self.inner.list_events(user_id, limit).await
        }
    }

    fn pending_row(user_id: Uuid, created_at: chrono::DateTime<Utc>) -> Redemption {
        Redemption::pending(user_id, Uuid::now_v7(), 100, created_at)
    }

    #[tokio::test]
    async fn test_fulfill_terminal_redemption_fails_without_locking() {
        let user_id = Uuid::now_v7();
        let mut expired = pending_row(user_id, Utc::now());
        expired.status = RedemptionStatus::Expired;
        let redemption_id = expired.id;

        let mut redemptions = MockRedemptionStore::new();
        redemptions
            .expect_get_redemption()
            .returning(move |_| Ok(Some(expired.clone())));

        // 对该用户开启工作单元会返回 Database 错误
        let ledger = Ledger::new(
            Arc::new(FlakyStore {
                inner: MemoryLoyaltyStore::new(),
                broken_user: user_id,
            }),
            OutboxSignal::new(),
        );
        let service = RedemptionService::new(
            ledger,
            Arc::new(MockRewardCatalog::new()),
            Arc::new(redemptions),
            config(),
        );

        let err = service.fulfill(redemption_id).await.unwrap_err();
        match err {
            PointsError::InvalidRedemptionStatus {
                redemption_id: id,
                current_status,
            } => {
                assert_eq!(id, redemption_id);
                assert_eq!(current_status, "EXPIRED");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_expire_skips_rows_inside_ttl() {
        let now = Utc::now();
        let user_id = Uuid::now_v7();
        // 存储返回了刚好位于截止时刻的记录，不应过期
        let boundary = pending_row(user_id, now - config().pending_ttl());

        let mut redemptions = MockRedemptionStore::new();
        redemptions
            .expect_get_pending_older_than()
            .returning(move |_| Ok(vec![boundary.clone()]));

        let ledger = Ledger::new(
            Arc::new(FlakyStore {
                inner: MemoryLoyaltyStore::new(),
                broken_user: user_id,
            }),
            OutboxSignal::new(),
        );
        let service = RedemptionService::new(
            ledger,
            Arc::new(MockRewardCatalog::new()),
            Arc::new(redemptions),
            config(),
        );

        let summary = service.expire_stale(now).await.unwrap();
        assert_eq!(summary.scanned, 1);
        assert_eq!(summary.expired, 0);
        assert_eq!(summary.skipped, 1);
        assert!(summary.failed.is_empty());
    }

    #[tokio::test]
    async fn test_expire_isolates_row_failures() {
        let inner = MemoryLoyaltyStore::new();
        let reward = RewardCatalogEntry::new("充电券", 100);
        inner.insert_reward(reward.clone());

        let healthy = Uuid::now_v7();
        let broken = Uuid::now_v7();

        // 先用正常存储完成两笔兑换
        {
            let ledger = Ledger::new(Arc::new(inner.clone()), OutboxSignal::new());
            let service = RedemptionService::new(
                ledger.clone(),
                Arc::new(inner.clone()),
                Arc::new(inner.clone()),
                config(),
            );
            for user in [healthy, broken] {
                ledger
                    .append(PointsEventDraft::new(user, PointsEventType::Referral, 300))
                    .await
                    .unwrap();
                service
                    .redeem(RedeemRequest::new(user, reward.id))
                    .await
                    .unwrap();
            }
        }

        let flaky = FlakyStore {
            inner: inner.clone(),
            broken_user: broken,
        };
        let service = RedemptionService::new(
            Ledger::new(Arc::new(flaky), OutboxSignal::new()),
            Arc::new(inner.clone()),
            Arc::new(inner.clone()),
            config(),
        );

        let summary = service
            .expire_stale(Utc::now() + Duration::hours(25))
            .await
            .unwrap();

        assert_eq!(summary.scanned, 2);
        assert_eq!(summary.expired, 1);
        assert_eq!(summary.failed.len(), 1);

        let statuses: Vec<_> = inner
            .redemptions()
            .into_iter()
            .map(|r| (r.user_id, r.status))
            .collect();
        assert!(statuses.contains(&(healthy, RedemptionStatus::Expired)));
        assert!(statuses.contains(&(broken, RedemptionStatus::Pending)));
        let failed_row = inner
            .redemptions()
            .into_iter()
            .find(|r| r.user_id == broken)
            .unwrap();
        assert_eq!(summary.failed, vec![failed_row.id]);
    }
}
