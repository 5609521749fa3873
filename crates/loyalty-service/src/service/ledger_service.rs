//! 账本服务
//!
//! 流水只追加；每次追加都在同一工作单元内入队一条 `user-points-updated` 通知。

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, instrument};
use uuid::Uuid;

use loyalty_shared::events::UserPointsUpdated;
use loyalty_shared::kafka::topics;

use crate::error::Result;
use crate::models::{NewOutboxMessage, PointsEvent, PointsEventDraft};
use crate::outbox::OutboxSignal;
use crate::repository::{LedgerStore, UnitOfWork};

/// 积分账本
pub struct Ledger<S: LedgerStore> {
    store: Arc<S>,
    signal: OutboxSignal,
}

impl<S: LedgerStore> Clone for Ledger<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            signal: self.signal.clone(),
        }
    }
}

impl<S: LedgerStore> Ledger<S> {
    pub fn new(store: Arc<S>, signal: OutboxSignal) -> Self {
        Self { store, signal }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// 提交后用于唤醒分发器
    pub fn signal(&self) -> &OutboxSignal {
        &self.signal
    }

    /// 开启用户工作单元
    pub async fn begin(&self, user_id: Uuid) -> Result<S::Uow> {
        self.store.begin(user_id).await
    }

    /// 在调用方的工作单元内追加流水
    ///
    /// 分配 ID 与服务端时间戳；提交由调用方负责
    pub async fn append_in(&self, uow: &mut S::Uow, draft: PointsEventDraft) -> Result<PointsEvent> {
        let event = draft.into_event(Utc::now());
        uow.append_event(&event).await?;

        let notification = UserPointsUpdated {
            user_id: event.user_id,
            event_id: event.id,
            points: event.points,
            event_type: event.event_type.as_str().to_string(),
            session_id: if event.event_type.is_accrual() {
                event.ref_id.clone()
            } else {
                None
            },
        };
        uow.enqueue(NewOutboxMessage::json(
            topics::USER_POINTS_UPDATED,
            event.user_id.to_string(),
            &notification,
        )?)
        .await?;

        debug!(
            event_id = %event.id,
            user_id = %event.user_id,
            event_type = %event.event_type,
            points = event.points,
            "流水已暂存"
        );
        Ok(event)
    }

    /// 单独追加一条流水并提交
    #[instrument(skip(self, draft), fields(user_id = %draft.user_id, event_type = %draft.event_type))]
    pub async fn append(&self, draft: PointsEventDraft) -> Result<PointsEvent> {
        let mut uow = self.begin(draft.user_id).await?;
        let event = self.append_in(&mut uow, draft).await?;
        uow.commit().await?;
        self.signal.notify();
        Ok(event)
    }

    /// 已提交流水之和
    pub async fn balance_of(&self, user_id: Uuid) -> Result<i64> {
        self.store.balance_of(user_id).await
    }

    /// 最近的流水，新的在前
    pub async fn history(&self, user_id: Uuid, limit: i64) -> Result<Vec<PointsEvent>> {
        self.store.list_events(user_id, limit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PointsEventType;
    use crate::repository::MemoryLoyaltyStore;

    fn ledger() -> (Ledger<MemoryLoyaltyStore>, Arc<MemoryLoyaltyStore>) {
        let store = Arc::new(MemoryLoyaltyStore::new());
        (Ledger::new(store.clone(), OutboxSignal::new()), store)
    }

    #[tokio::test]
    async fn test_balance_is_sum_of_events() {
        let (ledger, _) = ledger();
        let user_id = Uuid::now_v7();

        for points in [70, 300, -120] {
            ledger
                .append(PointsEventDraft::new(user_id, PointsEventType::Referral, points))
                .await
                .unwrap();
        }

        let history = ledger.history(user_id, 10).await.unwrap();
        let sum: i64 = history.iter().map(|e| e.points).sum();
        assert_eq!(ledger.balance_of(user_id).await.unwrap(), 250);
        assert_eq!(sum, 250);
    }

    #[tokio::test]
    async fn test_append_enqueues_notification() {
        let (ledger, store) = ledger();
        let user_id = Uuid::now_v7();

        let event = ledger
            .append(
                PointsEventDraft::new(user_id, PointsEventType::ChargeKwh, 70).with_ref("session-1"),
            )
            .await
            .unwrap();

        let outbox = store.outbox_messages();
        assert_eq!(outbox.len(), 1);
        assert_eq!(outbox[0].topic, topics::USER_POINTS_UPDATED);
        assert_eq!(outbox[0].message_key, user_id.to_string());
        assert_eq!(outbox[0].payload["event_id"], serde_json::json!(event.id));
        assert_eq!(outbox[0].payload["session_id"], serde_json::json!("session-1"));
    }

    #[tokio::test]
    async fn test_debit_notification_has_no_session() {
        let (ledger, store) = ledger();
        let user_id = Uuid::now_v7();

        ledger
            .append(
                PointsEventDraft::new(user_id, PointsEventType::Redemption, -50)
                    .with_ref(Uuid::now_v7().to_string()),
            )
            .await
            .unwrap();

        let outbox = store.outbox_messages();
        assert!(outbox[0].payload.get("session_id").is_none());
        assert_eq!(outbox[0].payload["points"], serde_json::json!(-50));
    }
}
