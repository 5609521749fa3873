//! 作业锁
//!
//! 定时清扫在多实例部署时只需一个实例执行：Redis 优先，PostgreSQL 后备。
//! 锁只用于减少重复执行，清扫本身的逐行条件更新保证了重复执行也是安全的。

mod lock_manager;

pub use lock_manager::{LockConfig, LockGuard, LockManager};
