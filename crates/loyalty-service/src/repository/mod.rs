//! 存储层
//!
//! 提供所有实体的数据访问接口，封装 SQL 操作细节。
//!
//! ## 设计原则
//!
//! - 仓储只负责数据持久化，不包含业务逻辑
//! - 使用 SQLx 进行类型安全的数据库操作
//! - 写入经由 `UnitOfWork` 聚合，提交前对其他读者不可见
//! - 同一用户的工作单元互斥，不同用户互不阻塞
//! - 内存实现与 PostgreSQL 实现遵循同一组 trait

mod ledger_repo;
mod memory_store;
mod outbox_repo;
mod redemption_repo;
mod reward_repo;
mod traits;
mod unit_of_work;

pub use ledger_repo::PointsLedgerRepository;
pub use memory_store::{MemoryLoyaltyStore, MemoryUnitOfWork};
pub use outbox_repo::OutboxRepository;
pub use redemption_repo::RedemptionRepository;
pub use reward_repo::RewardRepository;
pub use traits::*;
pub use unit_of_work::PgUnitOfWork;
