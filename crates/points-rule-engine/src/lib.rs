//! 积分规则引擎
//!
//! 将业务事件换算为积分数额：
//! - YAML 规则文档的加载与校验（进程启动时加载一次，之后不可变）
//! - 封闭的事件触发器枚举，每种事件一种负载形态
//! - 无副作用的纯函数评估

pub mod error;
pub mod evaluator;
pub mod event;
pub mod models;

pub use error::{Result, RuleError};
pub use evaluator::RuleEvaluator;
pub use event::PointsTrigger;
pub use models::{Rule, RulesConfig, Settings};
