//! 累计到兑换的端到端流程（内存存储）

use std::sync::Arc;

use serde_json::json;
use uuid::Uuid;

use loyalty::dto::{AccrualRequest, RedeemRequest};
use loyalty::{
    AccrualService, Ledger, MemoryLoyaltyStore, OutboxSignal, PointsError, PointsEventType,
    RedemptionService, RewardCatalogEntry,
};
use loyalty_shared::config::{AccrualConfig, RedemptionConfig};
use loyalty_shared::test_utils::TestDataGenerator;
use rule_engine::{RuleError, RuleEvaluator, RulesConfig};

const RULES: &str = r#"
rules:
  charge_kwh:
    points_per_kwh: 10
  referral:
    points: 300
  rating:
    points: 50
  first_charge:
    points: 200
  daily_login:
    base_points: 10
    streak_multiplier: 1.5
    max_streak_days: 7
settings:
  max_points_per_day: 1000
  max_points_per_event: 500
  enable_streak_bonus: true
  enable_first_charge_bonus: false
"#;

fn services() -> (
    AccrualService<MemoryLoyaltyStore>,
    RedemptionService<MemoryLoyaltyStore>,
    Arc<MemoryLoyaltyStore>,
) {
    let store = Arc::new(MemoryLoyaltyStore::new());
    let ledger = Ledger::new(store.clone(), OutboxSignal::new());
    let evaluator = Arc::new(RuleEvaluator::new(RulesConfig::from_yaml_str(RULES).unwrap()));

    let accrual = AccrualService::new(ledger.clone(), evaluator, AccrualConfig::default());
    let redemption = RedemptionService::new(
        ledger,
        store.clone(),
        store.clone(),
        RedemptionConfig::default(),
    );
    (accrual, redemption, store)
}

#[tokio::test]
async fn test_earn_then_redeem() {
    let (accrual, redemption, store) = services();
    let user_id = Uuid::now_v7();
    let user = user_id.to_string();

    let charge = accrual
        .accrue(
            AccrualRequest::new(&user, "CHARGE_KWH")
                .with_session("sess-001")
                .with_payload(json!({"kwh": 7})),
        )
        .await
        .unwrap();
    assert_eq!(charge.points, 70);
    assert_eq!(charge.session_id.as_deref(), Some("sess-001"));

    let login = accrual
        .accrue(AccrualRequest::new(&user, "DAILY_LOGIN").with_payload(TestDataGenerator::login_payload(3)))
        .await
        .unwrap();
    assert_eq!(login.points, 22);

    let referral = accrual
        .accrue(AccrualRequest::new(&user, "REFERRAL"))
        .await
        .unwrap();
    assert_eq!(referral.points, 300);

    // 首充奖励关闭：0 分且不报错
    let first = accrual
        .accrue(AccrualRequest::new(&user, "FIRST_CHARGE"))
        .await
        .unwrap();
    assert_eq!(first.points, 0);

    let reward = RewardCatalogEntry::new("免费充电 30 分钟", 300);
    store.insert_reward(reward.clone());
    redemption
        .redeem(RedeemRequest::new(user_id, reward.id))
        .await
        .unwrap();

    let history = Ledger::new(store.clone(), OutboxSignal::new())
        .history(user_id, 10)
        .await
        .unwrap();
    assert_eq!(history.len(), 5);
    assert_eq!(history[0].event_type, PointsEventType::Redemption);

    let ledger = Ledger::new(store.clone(), OutboxSignal::new());
    assert_eq!(ledger.balance_of(user_id).await.unwrap(), 92);
}

#[tokio::test]
async fn test_charge_is_capped_per_event() {
    let (accrual, _, _) = services();

    let response = accrual
        .accrue(
            AccrualRequest::new(Uuid::now_v7().to_string(), "CHARGE_KWH")
                .with_payload(TestDataGenerator::charge_payload(80.0)),
        )
        .await
        .unwrap();

    assert_eq!(response.points, 500);
}

#[tokio::test]
async fn test_unknown_event_type_awards_nothing() {
    let (accrual, _, store) = services();

    let err = accrual
        .accrue(AccrualRequest::new(Uuid::now_v7().to_string(), "PURCHASE"))
        .await
        .unwrap_err();

    assert!(matches!(err, PointsError::Rule(RuleError::UnknownEventType(_))));
    assert_eq!(err.error_code(), "UNKNOWN_EVENT_TYPE");
    assert!(store.events().is_empty());
}
