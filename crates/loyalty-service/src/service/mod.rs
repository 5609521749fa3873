//! 业务服务层
//!
//! - `Ledger`: 账本追加与余额查询
//! - `AccrualService`: 规则评估 + 每日上限 + 入账
//! - `RedemptionService`: 兑换、过期清扫、履约

mod accrual_service;
pub mod dto;
mod ledger_service;
mod redemption_service;

pub use accrual_service::AccrualService;
pub use ledger_service::Ledger;
pub use redemption_service::RedemptionService;
