//! PostgreSQL 存储集成测试
//!
//! 需要可用的数据库，通过 DATABASE_URL 指定：
//! `cargo test -p loyalty-service --test pg_store_test -- --ignored --test-threads=1`

use std::sync::Arc;

use chrono::{Duration, Utc};
use uuid::Uuid;

use loyalty::dto::RedeemRequest;
use loyalty::{
    Ledger, LedgerStore, MIGRATOR, OutboxRepository, OutboxSignal, OutboxStore, PointsError,
    PointsEventDraft, PointsEventType, PointsLedgerRepository, RedemptionRepository,
    RedemptionService, RedemptionStatus, RewardCatalogEntry, RewardRepository, UnitOfWork,
};
use loyalty_shared::config::RedemptionConfig;
use loyalty_shared::database::Database;
use loyalty_shared::test_utils::test_database_config;

struct PgHarness {
    ledger: Ledger<PointsLedgerRepository>,
    rewards: Arc<RewardRepository>,
    service: Arc<RedemptionService<PointsLedgerRepository>>,
    outbox: OutboxRepository,
}

async fn setup(config: RedemptionConfig) -> PgHarness {
    let db = Database::connect(&test_database_config()).await.unwrap();
    db.run_migrations(&MIGRATOR).await.unwrap();
    let pool = db.pool().clone();

    let ledger = Ledger::new(
        Arc::new(PointsLedgerRepository::new(pool.clone())),
        OutboxSignal::new(),
    );
    let rewards = Arc::new(RewardRepository::new(pool.clone()));
    let service = Arc::new(RedemptionService::new(
        ledger.clone(),
        rewards.clone(),
        Arc::new(RedemptionRepository::new(pool.clone())),
        config,
    ));

    PgHarness {
        ledger,
        rewards,
        service,
        outbox: OutboxRepository::new(pool),
    }
}

impl PgHarness {
    async fn reward(&self, cost: i64) -> RewardCatalogEntry {
        let reward = RewardCatalogEntry::new(format!("pg-reward-{}", Uuid::now_v7()), cost);
        self.rewards.create(&reward).await.unwrap();
        reward
    }

    async fn fund(&self, user_id: Uuid, points: i64) {
        self.ledger
            .append(PointsEventDraft::new(user_id, PointsEventType::Referral, points))
            .await
            .unwrap();
    }
}

#[tokio::test]
#[ignore = "需要 PostgreSQL"]
async fn test_pg_redeem_and_balance() {
    let h = setup(RedemptionConfig::default()).await;
    let user_id = Uuid::now_v7();
    let reward = h.reward(500).await;
    h.fund(user_id, 600).await;

    let response = h
        .service
        .redeem(RedeemRequest::new(user_id, reward.id))
        .await
        .unwrap();

    assert_eq!(h.ledger.balance_of(user_id).await.unwrap(), 100);
    let stored = h.service.get_redemption(response.redemption_id).await.unwrap();
    assert_eq!(stored.status, RedemptionStatus::Pending);
    assert_eq!(stored.points_spent, 500);

    let history = h.ledger.history(user_id, 10).await.unwrap();
    let sum: i64 = history.iter().map(|e| e.points).sum();
    assert_eq!(sum, 100);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore = "需要 PostgreSQL"]
async fn test_pg_concurrent_redeems_cannot_overdraw() {
    let h = setup(RedemptionConfig::default()).await;
    let user_id = Uuid::now_v7();
    let expensive = h.reward(500).await.id;
    let cheaper = h.reward(400).await.id;
    h.fund(user_id, 600).await;

    let a = tokio::spawn({
        let service = h.service.clone();
        async move { service.redeem(RedeemRequest::new(user_id, expensive)).await }
    });
    let b = tokio::spawn({
        let service = h.service.clone();
        async move { service.redeem(RedeemRequest::new(user_id, cheaper)).await }
    });
    let results = [a.await.unwrap(), b.await.unwrap()];

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results.iter().any(|r| matches!(r, Err(PointsError::InsufficientPoints { .. }))));
    assert!(h.ledger.balance_of(user_id).await.unwrap() >= 100);
}

#[tokio::test]
#[ignore = "需要 PostgreSQL"]
async fn test_pg_user_lock_wait_is_bounded() {
    let db = Database::connect(&test_database_config()).await.unwrap();
    db.run_migrations(&MIGRATOR).await.unwrap();
    let repo = PointsLedgerRepository::new(db.pool().clone())
        .with_lock_timeout(std::time::Duration::from_millis(200));

    let hot_user = Uuid::now_v7();
    let held = repo.begin(hot_user).await.unwrap();

    let started = std::time::Instant::now();
    let err = repo.begin(hot_user).await.unwrap_err();
    assert!(matches!(err, PointsError::Database(_)));
    assert!(err.is_retryable());
    assert!(started.elapsed() < std::time::Duration::from_secs(5));

    // 其他用户不受影响
    let other = repo.begin(Uuid::now_v7()).await.unwrap();
    other.commit().await.unwrap();
    held.commit().await.unwrap();

    let again = repo.begin(hot_user).await.unwrap();
    again.commit().await.unwrap();
}

#[tokio::test]
#[ignore = "需要 PostgreSQL"]
async fn test_pg_uncommitted_unit_rolls_back() {
    let h = setup(RedemptionConfig::default()).await;
    let user_id = Uuid::now_v7();

    {
        let mut uow = h.ledger.begin(user_id).await.unwrap();
        h.ledger
            .append_in(
                &mut uow,
                PointsEventDraft::new(user_id, PointsEventType::Rating, 50),
            )
            .await
            .unwrap();
        assert_eq!(uow.balance().await.unwrap(), 50);
    }

    assert_eq!(h.ledger.store().balance_of(user_id).await.unwrap(), 0);
}

#[tokio::test]
#[ignore = "需要 PostgreSQL"]
async fn test_pg_expire_with_refund() {
    let h = setup(RedemptionConfig {
        refund_on_expire: true,
        ..RedemptionConfig::default()
    })
    .await;
    let user_id = Uuid::now_v7();
    let reward = h.reward(200).await;
    h.fund(user_id, 200).await;

    let response = h
        .service
        .redeem(RedeemRequest::new(user_id, reward.id))
        .await
        .unwrap();
    assert_eq!(h.ledger.balance_of(user_id).await.unwrap(), 0);

    // 数据库中可能还有其他测试留下的 PENDING 记录，只断言本用户的结果
    let later = Utc::now() + Duration::hours(25);
    let summary = h.service.expire_stale(later).await.unwrap();
    assert!(summary.count() >= 1);

    let stored = h.service.get_redemption(response.redemption_id).await.unwrap();
    assert_eq!(stored.status, RedemptionStatus::Expired);
    assert_eq!(h.ledger.balance_of(user_id).await.unwrap(), 200);

    // 重复执行不会再次退还
    h.service.expire_stale(later).await.unwrap();
    assert_eq!(h.ledger.balance_of(user_id).await.unwrap(), 200);
}

#[tokio::test]
#[ignore = "需要 PostgreSQL"]
async fn test_pg_outbox_claim_and_deliver() {
    let h = setup(RedemptionConfig::default()).await;
    let user_id = Uuid::now_v7();
    h.fund(user_id, 10).await;

    let claimed = h
        .outbox
        .claim_batch(1000, Duration::seconds(30))
        .await
        .unwrap();
    let ours: Vec<_> = claimed
        .iter()
        .filter(|m| m.message_key == user_id.to_string())
        .collect();
    assert_eq!(ours.len(), 1);
    assert_eq!(ours[0].attempts, 1);

    for message in &claimed {
        h.outbox.mark_delivered(message.id).await.unwrap();
    }
    let reclaimed = h
        .outbox
        .claim_batch(1000, Duration::seconds(30))
        .await
        .unwrap();
    assert!(reclaimed.iter().all(|m| m.message_key != user_id.to_string()));
}
