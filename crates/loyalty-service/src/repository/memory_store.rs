//! 内存存储
//!
//! 与 PostgreSQL 实现遵循同一组 trait，供单机运行与测试使用。
//! 用户级互斥通过每用户一把异步锁实现，工作单元的写入先暂存，提交时整体生效。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use super::traits::{LedgerStore, OutboxStore, RedemptionStore, RewardCatalog, UnitOfWork};
use crate::error::{PointsError, Result};
use crate::models::{
    NewOutboxMessage, OutboxMessage, PointsEvent, PointsEventType, Redemption, RedemptionStatus,
    RewardCatalogEntry,
};

#[derive(Default)]
struct MemoryState {
    events: Vec<PointsEvent>,
    redemptions: HashMap<Uuid, Redemption>,
    rewards: HashMap<Uuid, RewardCatalogEntry>,
    outbox: Vec<OutboxMessage>,
    /// outbox 消息的认领租约
    leases: HashMap<Uuid, DateTime<Utc>>,
}

impl MemoryState {
    fn has_redemption_debit(&self, ref_id: &str) -> bool {
        self.events.iter().any(|e| is_redemption_debit(e, ref_id))
    }
}

fn is_redemption_debit(event: &PointsEvent, ref_id: &str) -> bool {
    event.event_type == PointsEventType::Redemption && event.ref_id.as_deref() == Some(ref_id)
}

fn counts_toward_accrual(event: &PointsEvent, user_id: Uuid, since: DateTime<Utc>) -> bool {
    event.user_id == user_id
        && event.event_type.is_accrual()
        && event.points > 0
        && event.occurred_at >= since
}

/// 内存版积分存储
#[derive(Clone, Default)]
pub struct MemoryLoyaltyStore {
    state: Arc<RwLock<MemoryState>>,
    user_locks: Arc<DashMap<Uuid, Arc<Mutex<()>>>>,
}

impl MemoryLoyaltyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 写入奖励目录
    pub fn insert_reward(&self, reward: RewardCatalogEntry) {
        self.state.write().rewards.insert(reward.id, reward);
    }

    /// 全部已提交流水，按写入顺序
    pub fn events(&self) -> Vec<PointsEvent> {
        self.state.read().events.clone()
    }

    /// 全部兑换记录，按创建时间升序
    pub fn redemptions(&self) -> Vec<Redemption> {
        let mut redemptions: Vec<_> = self.state.read().redemptions.values().cloned().collect();
        redemptions.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        redemptions
    }

    /// 全部 outbox 消息，按入队顺序
    pub fn outbox_messages(&self) -> Vec<OutboxMessage> {
        self.state.read().outbox.clone()
    }
}

#[async_trait]
impl LedgerStore for MemoryLoyaltyStore {
    type Uow = MemoryUnitOfWork;

    async fn begin(&self, user_id: Uuid) -> Result<MemoryUnitOfWork> {
        let lock = self.user_locks.entry(user_id).or_default().clone();
        let guard = lock.lock_owned().await;

        Ok(MemoryUnitOfWork {
            user_id,
            state: self.state.clone(),
            _guard: guard,
            events: Vec::new(),
            inserted: Vec::new(),
            updated: HashMap::new(),
            outbox: Vec::new(),
        })
    }

    async fn balance_of(&self, user_id: Uuid) -> Result<i64> {
        let state = self.state.read();
        Ok(state
            .events
            .iter()
            .filter(|e| e.user_id == user_id)
            .map(|e| e.points)
            .sum())
    }

    async fn list_events(&self, user_id: Uuid, limit: i64) -> Result<Vec<PointsEvent>> {
        let state = self.state.read();
        let mut events: Vec<_> = state
            .events
            .iter()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect();
        events.sort_by(|a, b| b.occurred_at.cmp(&a.occurred_at).then(b.id.cmp(&a.id)));
        events.truncate(limit.max(0) as usize);
        Ok(events)
    }
}

/// 内存版工作单元
///
/// 持有用户锁直到提交或丢弃
pub struct MemoryUnitOfWork {
    user_id: Uuid,
    state: Arc<RwLock<MemoryState>>,
    _guard: OwnedMutexGuard<()>,
    events: Vec<PointsEvent>,
    inserted: Vec<Redemption>,
    updated: HashMap<Uuid, Redemption>,
    outbox: Vec<NewOutboxMessage>,
}

impl MemoryUnitOfWork {
    fn ensure_owner(&self, user_id: Uuid) -> Result<()> {
        if user_id != self.user_id {
            return Err(PointsError::Internal(format!(
                "工作单元属于用户 {}，不能写入用户 {} 的数据",
                self.user_id, user_id
            )));
        }
        Ok(())
    }

    /// 本单元视角下的兑换记录（暂存优先于已提交）
    fn current_redemption(&self, id: Uuid) -> Option<Redemption> {
        if let Some(r) = self.updated.get(&id) {
            return Some(r.clone());
        }
        if let Some(r) = self.inserted.iter().find(|r| r.id == id) {
            return Some(r.clone());
        }
        self.state.read().redemptions.get(&id).cloned()
    }
}

#[async_trait]
impl UnitOfWork for MemoryUnitOfWork {
    fn user_id(&self) -> Uuid {
        self.user_id
    }

    async fn balance(&mut self) -> Result<i64> {
        let committed: i64 = self
            .state
            .read()
            .events
            .iter()
            .filter(|e| e.user_id == self.user_id)
            .map(|e| e.points)
            .sum();
        let staged: i64 = self.events.iter().map(|e| e.points).sum();
        Ok(committed + staged)
    }

    async fn accrued_since(&mut self, since: DateTime<Utc>) -> Result<i64> {
        let committed: i64 = self
            .state
            .read()
            .events
            .iter()
            .filter(|e| counts_toward_accrual(e, self.user_id, since))
            .map(|e| e.points)
            .sum();
        let staged: i64 = self
            .events
            .iter()
            .filter(|e| counts_toward_accrual(e, self.user_id, since))
            .map(|e| e.points)
            .sum();
        Ok(committed + staged)
    }

    async fn append_event(&mut self, event: &PointsEvent) -> Result<()> {
        self.ensure_owner(event.user_id)?;

        if event.event_type == PointsEventType::Redemption {
            if let Some(ref_id) = event.ref_id.as_deref() {
                let duplicated = self.events.iter().any(|e| is_redemption_debit(e, ref_id))
                    || self.state.read().has_redemption_debit(ref_id);
                if duplicated {
                    return Err(PointsError::Internal(format!(
                        "兑换 {} 已存在扣减流水",
                        ref_id
                    )));
                }
            }
        }

        self.events.push(event.clone());
        Ok(())
    }

    async fn insert_redemption(&mut self, redemption: &Redemption) -> Result<()> {
        self.ensure_owner(redemption.user_id)?;

        if self.current_redemption(redemption.id).is_some() {
            return Err(PointsError::Internal(format!(
                "兑换记录已存在: {}",
                redemption.id
            )));
        }

        self.inserted.push(redemption.clone());
        Ok(())
    }

    async fn update_redemption_status(
        &mut self,
        id: Uuid,
        from: RedemptionStatus,
        to: RedemptionStatus,
        now: DateTime<Utc>,
    ) -> Result<Option<Redemption>> {
        let Some(current) = self.current_redemption(id) else {
            return Ok(None);
        };
        if current.status != from {
            return Ok(None);
        }
        self.ensure_owner(current.user_id)?;

        let updated = Redemption {
            status: to,
            updated_at: now,
            ..current
        };
        self.updated.insert(id, updated.clone());
        Ok(Some(updated))
    }

    async fn enqueue(&mut self, message: NewOutboxMessage) -> Result<()> {
        self.outbox.push(message);
        Ok(())
    }

    async fn commit(self) -> Result<()> {
        let now = Utc::now();
        let mut state = self.state.write();

        state.events.extend(self.events);
        for redemption in self.inserted {
            state.redemptions.insert(redemption.id, redemption);
        }
        for (id, redemption) in self.updated {
            state.redemptions.insert(id, redemption);
        }
        state.outbox.extend(
            self.outbox
                .into_iter()
                .map(|message| OutboxMessage::from_new(message, now)),
        );

        Ok(())
    }
}

#[async_trait]
impl RewardCatalog for MemoryLoyaltyStore {
    async fn get_reward(&self, id: Uuid) -> Result<Option<RewardCatalogEntry>> {
        Ok(self.state.read().rewards.get(&id).cloned())
    }

    async fn list_active_rewards(&self) -> Result<Vec<RewardCatalogEntry>> {
        let mut rewards: Vec<_> = self
            .state
            .read()
            .rewards
            .values()
            .filter(|r| r.active)
            .cloned()
            .collect();
        rewards.sort_by(|a, b| a.cost.cmp(&b.cost).then_with(|| a.name.cmp(&b.name)));
        Ok(rewards)
    }
}

#[async_trait]
impl RedemptionStore for MemoryLoyaltyStore {
    async fn get_redemption(&self, id: Uuid) -> Result<Option<Redemption>> {
        Ok(self.state.read().redemptions.get(&id).cloned())
    }

    async fn list_redemptions_by_user(&self, user_id: Uuid, limit: i64) -> Result<Vec<Redemption>> {
        let mut redemptions: Vec<_> = self
            .state
            .read()
            .redemptions
            .values()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect();
        redemptions.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        redemptions.truncate(limit.max(0) as usize);
        Ok(redemptions)
    }

    async fn get_pending_older_than(&self, cutoff: DateTime<Utc>) -> Result<Vec<Redemption>> {
        Ok(self
            .redemptions()
            .into_iter()
            .filter(|r| r.status == RedemptionStatus::Pending && r.created_at < cutoff)
            .collect())
    }
}

#[async_trait]
impl OutboxStore for MemoryLoyaltyStore {
    async fn claim_batch(&self, limit: i64, lease: Duration) -> Result<Vec<OutboxMessage>> {
        let now = Utc::now();
        let mut state = self.state.write();
        let MemoryState { outbox, leases, .. } = &mut *state;

        let mut claimed = Vec::new();
        for message in outbox.iter_mut() {
            if claimed.len() as i64 >= limit {
                break;
            }
            let leased = leases.get(&message.id).is_some_and(|until| *until >= now);
            if !message.is_pending() || message.available_at > now || leased {
                continue;
            }
            message.attempts += 1;
            leases.insert(message.id, now + lease);
            claimed.push(message.clone());
        }

        Ok(claimed)
    }

    async fn mark_delivered(&self, id: Uuid) -> Result<()> {
        let mut state = self.state.write();
        state.leases.remove(&id);
        if let Some(message) = state.outbox.iter_mut().find(|m| m.id == id) {
            message.delivered_at = Some(Utc::now());
            message.last_error = None;
        }
        Ok(())
    }

    async fn mark_failed(
        &self,
        id: Uuid,
        error: &str,
        retry_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let mut state = self.state.write();
        state.leases.remove(&id);
        if let Some(message) = state.outbox.iter_mut().find(|m| m.id == id) {
            message.last_error = Some(error.to_string());
            match retry_at {
                Some(at) => message.available_at = at,
                None => message.dead_at = Some(Utc::now()),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PointsEventDraft;

    fn credit(user_id: Uuid, points: i64) -> PointsEvent {
        PointsEventDraft::new(user_id, PointsEventType::Referral, points).into_event(Utc::now())
    }

    #[tokio::test]
    async fn test_uncommitted_writes_are_discarded() {
        let store = MemoryLoyaltyStore::new();
        let user_id = Uuid::now_v7();

        {
            let mut uow = store.begin(user_id).await.unwrap();
            uow.append_event(&credit(user_id, 300)).await.unwrap();
            assert_eq!(uow.balance().await.unwrap(), 300);
        }

        assert_eq!(store.balance_of(user_id).await.unwrap(), 0);
        assert!(store.events().is_empty());
    }

    #[tokio::test]
    async fn test_commit_makes_writes_visible() {
        let store = MemoryLoyaltyStore::new();
        let user_id = Uuid::now_v7();

        let mut uow = store.begin(user_id).await.unwrap();
        uow.append_event(&credit(user_id, 300)).await.unwrap();
        uow.append_event(&credit(user_id, -100)).await.unwrap();
        uow.commit().await.unwrap();

        assert_eq!(store.balance_of(user_id).await.unwrap(), 200);
        assert_eq!(store.list_events(user_id, 10).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_same_user_units_are_serialized() {
        let store = MemoryLoyaltyStore::new();
        let user_id = Uuid::now_v7();

        let first = store.begin(user_id).await.unwrap();
        let blocked =
            tokio::time::timeout(std::time::Duration::from_millis(50), store.begin(user_id)).await;
        assert!(blocked.is_err());

        // 不同用户不受影响
        let other = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            store.begin(Uuid::now_v7()),
        )
        .await;
        assert!(other.is_ok());

        drop(first);
        let second =
            tokio::time::timeout(std::time::Duration::from_millis(50), store.begin(user_id)).await;
        assert!(second.is_ok());
    }

    #[tokio::test]
    async fn test_rejects_foreign_user_event() {
        let store = MemoryLoyaltyStore::new();
        let mut uow = store.begin(Uuid::now_v7()).await.unwrap();

        let result = uow.append_event(&credit(Uuid::now_v7(), 10)).await;
        assert!(matches!(result, Err(PointsError::Internal(_))));
    }

    #[tokio::test]
    async fn test_rejects_second_debit_for_same_redemption() {
        let store = MemoryLoyaltyStore::new();
        let user_id = Uuid::now_v7();
        let redemption_id = Uuid::now_v7().to_string();
        let debit = || {
            PointsEventDraft::new(user_id, PointsEventType::Redemption, -100)
                .with_ref(redemption_id.clone())
                .into_event(Utc::now())
        };

        let mut uow = store.begin(user_id).await.unwrap();
        uow.append_event(&debit()).await.unwrap();
        assert!(uow.append_event(&debit()).await.is_err());
    }

    #[tokio::test]
    async fn test_conditional_status_update() {
        let store = MemoryLoyaltyStore::new();
        let user_id = Uuid::now_v7();
        let redemption = Redemption::pending(user_id, Uuid::now_v7(), 100, Utc::now());

        let mut uow = store.begin(user_id).await.unwrap();
        uow.insert_redemption(&redemption).await.unwrap();
        uow.commit().await.unwrap();

        let mut uow = store.begin(user_id).await.unwrap();
        let updated = uow
            .update_redemption_status(
                redemption.id,
                RedemptionStatus::Pending,
                RedemptionStatus::Expired,
                Utc::now(),
            )
            .await
            .unwrap();
        assert_eq!(updated.unwrap().status, RedemptionStatus::Expired);

        // 同一单元内再次迁移看到的是暂存后的状态
        let again = uow
            .update_redemption_status(
                redemption.id,
                RedemptionStatus::Pending,
                RedemptionStatus::Expired,
                Utc::now(),
            )
            .await
            .unwrap();
        assert!(again.is_none());
        uow.commit().await.unwrap();

        let stored = store.get_redemption(redemption.id).await.unwrap().unwrap();
        assert_eq!(stored.status, RedemptionStatus::Expired);
    }

    #[tokio::test]
    async fn test_outbox_claim_and_lease() {
        let store = MemoryLoyaltyStore::new();
        let user_id = Uuid::now_v7();

        let mut uow = store.begin(user_id).await.unwrap();
        let message =
            NewOutboxMessage::json("topic-a", user_id.to_string(), &serde_json::json!({"a": 1}))
                .unwrap();
        uow.enqueue(message).await.unwrap();
        uow.commit().await.unwrap();

        let claimed = store.claim_batch(10, Duration::seconds(30)).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].attempts, 1);

        // 租约期内不可再次认领
        assert!(store.claim_batch(10, Duration::seconds(30)).await.unwrap().is_empty());

        store.mark_failed(claimed[0].id, "boom", None).await.unwrap();
        let stored = store.outbox_messages();
        assert!(stored[0].dead_at.is_some());
        assert_eq!(stored[0].last_error.as_deref(), Some("boom"));
        assert!(store.claim_batch(10, Duration::seconds(30)).await.unwrap().is_empty());
    }
}
