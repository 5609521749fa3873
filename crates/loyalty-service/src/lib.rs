//! 积分服务
//!
//! 积分账本与兑换一致性核心。
//!
//! ## 核心功能
//!
//! - **积分累计**：规则引擎换算积分，按日上限裁剪后写入账本
//! - **账本**：只追加的积分流水，余额由流水求和得出，从不单独存储
//! - **兑换**：余额校验与扣减在同一工作单元内完成，按用户串行化，防止透支
//! - **过期清扫**：超时未履约的 PENDING 兑换定期置为 EXPIRED，可配置是否退还积分
//! - **Outbox**：通知与业务写入同事务入队，由独立分发器至少一次投递到 Kafka
//!
//! ## 模块结构
//!
//! - `models`: 领域模型定义
//! - `error`: 错误类型定义
//! - `repository`: 存储层（PostgreSQL 与内存实现）
//! - `service`: 业务服务层
//! - `outbox`: 通知分发
//! - `worker`: 后台定时任务
//! - `lock`: 分布式作业锁

pub mod error;
pub mod lock;
pub mod models;
pub mod outbox;
pub mod repository;
pub mod service;
pub mod worker;

pub use error::{PointsError, Result};
pub use lock::{LockConfig, LockGuard, LockManager};
pub use models::*;
pub use outbox::{
    DispatchStats, EventPublisher, KafkaEventPublisher, LogEventPublisher, OutboxDispatcher,
    OutboxSignal,
};
pub use repository::{
    LedgerStore, MemoryLoyaltyStore, OutboxRepository, OutboxStore, PointsLedgerRepository,
    RedemptionRepository, RedemptionStore, RewardCatalog, RewardRepository, UnitOfWork,
};
pub use service::{AccrualService, Ledger, RedemptionService, dto};
pub use worker::ExpireWorker;

/// 内嵌的数据库迁移
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");
