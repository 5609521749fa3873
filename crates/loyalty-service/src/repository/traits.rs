//! 存储 Trait 定义
//!
//! 服务层依赖抽象而非具体实现，支持 mock 测试与内存运行

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::models::{
    NewOutboxMessage, OutboxMessage, PointsEvent, Redemption, RedemptionStatus,
    RewardCatalogEntry,
};

/// 单个用户范围内的原子工作单元
///
/// 开启时取得该用户的排他锁，直到提交或丢弃才释放。
/// 暂存的写入只在 `commit` 成功后整体可见；未提交即被丢弃等同回滚。
#[async_trait]
pub trait UnitOfWork: Send {
    /// 工作单元所属用户
    fn user_id(&self) -> Uuid;

    /// 已提交流水与本单元暂存流水之和
    async fn balance(&mut self) -> Result<i64>;

    /// 自 `since` 起累计类流水的正向积分之和（用于每日上限）
    async fn accrued_since(&mut self, since: DateTime<Utc>) -> Result<i64>;

    async fn append_event(&mut self, event: &PointsEvent) -> Result<()>;

    async fn insert_redemption(&mut self, redemption: &Redemption) -> Result<()>;

    /// 条件迁移：仅当当前状态为 `from` 时更新，否则返回 None
    async fn update_redemption_status(
        &mut self,
        id: Uuid,
        from: RedemptionStatus,
        to: RedemptionStatus,
        now: DateTime<Utc>,
    ) -> Result<Option<Redemption>>;

    async fn enqueue(&mut self, message: NewOutboxMessage) -> Result<()>;

    async fn commit(self) -> Result<()>;
}

/// 账本存储
#[async_trait]
pub trait LedgerStore: Send + Sync + 'static {
    type Uow: UnitOfWork + 'static;

    /// 开启某用户的工作单元，阻塞等待同一用户的其他工作单元结束
    async fn begin(&self, user_id: Uuid) -> Result<Self::Uow>;

    /// 已提交流水之和
    async fn balance_of(&self, user_id: Uuid) -> Result<i64>;

    /// 按时间倒序列出用户流水
    async fn list_events(&self, user_id: Uuid, limit: i64) -> Result<Vec<PointsEvent>>;
}

/// 奖励目录（只读）
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RewardCatalog: Send + Sync {
    async fn get_reward(&self, id: Uuid) -> Result<Option<RewardCatalogEntry>>;
    async fn list_active_rewards(&self) -> Result<Vec<RewardCatalogEntry>>;
}

/// 兑换记录查询
///
/// 状态变更只能经由 `UnitOfWork`，保证与账本写入同属一个原子单元
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RedemptionStore: Send + Sync {
    async fn get_redemption(&self, id: Uuid) -> Result<Option<Redemption>>;
    async fn list_redemptions_by_user(&self, user_id: Uuid, limit: i64) -> Result<Vec<Redemption>>;
    /// 创建时间严格早于 cutoff 的 PENDING 兑换，按创建时间升序
    async fn get_pending_older_than(&self, cutoff: DateTime<Utc>) -> Result<Vec<Redemption>>;
}

/// Outbox 队列
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// 认领一批可投递消息并加租约，投递次数加一
    async fn claim_batch(&self, limit: i64, lease: Duration) -> Result<Vec<OutboxMessage>>;
    async fn mark_delivered(&self, id: Uuid) -> Result<()>;
    /// 记录失败；`retry_at` 为 None 时消息进入死信状态
    async fn mark_failed(
        &self,
        id: Uuid,
        error: &str,
        retry_at: Option<DateTime<Utc>>,
    ) -> Result<()>;
}
