//! 积分服务枚举类型定义
//!
//! 所有枚举都支持数据库（sqlx）和 JSON（serde）序列化

use std::fmt;

use rule_engine::PointsTrigger;
use serde::{Deserialize, Serialize};

/// 积分流水类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PointsEventType {
    ChargeKwh,
    Referral,
    Rating,
    FirstCharge,
    DailyLogin,
    /// 兑换扣减，ref_id 为兑换 ID
    Redemption,
    /// 兑换过期退还，ref_id 为兑换 ID
    RedemptionRefund,
}

impl PointsEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ChargeKwh => "CHARGE_KWH",
            Self::Referral => "REFERRAL",
            Self::Rating => "RATING",
            Self::FirstCharge => "FIRST_CHARGE",
            Self::DailyLogin => "DAILY_LOGIN",
            Self::Redemption => "REDEMPTION",
            Self::RedemptionRefund => "REDEMPTION_REFUND",
        }
    }

    /// 由规则引擎产生的累计类流水，计入每日上限
    pub fn is_accrual(&self) -> bool {
        !matches!(self, Self::Redemption | Self::RedemptionRefund)
    }
}

impl From<&PointsTrigger> for PointsEventType {
    fn from(trigger: &PointsTrigger) -> Self {
        match trigger {
            PointsTrigger::ChargeKwh { .. } => Self::ChargeKwh,
            PointsTrigger::Referral => Self::Referral,
            PointsTrigger::Rating => Self::Rating,
            PointsTrigger::FirstCharge => Self::FirstCharge,
            PointsTrigger::DailyLogin { .. } => Self::DailyLogin,
        }
    }
}

impl fmt::Display for PointsEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 兑换状态
///
/// PENDING 创建后只能进入 FULFILLED 或 EXPIRED，二者均为终态
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RedemptionStatus {
    /// 待履约 - 积分已扣减
    #[default]
    Pending,
    /// 已履约 - 外部履约流程完成
    Fulfilled,
    /// 已过期 - 清扫任务处理
    Expired,
    /// 已取消
    Cancelled,
}

impl RedemptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Fulfilled => "FULFILLED",
            Self::Expired => "EXPIRED",
            Self::Cancelled => "CANCELLED",
        }
    }

    /// 状态机允许的迁移，CANCELLED 只用于存量数据，不是任何操作的目标
    pub fn can_transition_to(&self, next: RedemptionStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Fulfilled) | (Self::Pending, Self::Expired)
        )
    }
}

impl fmt::Display for RedemptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
