//! 积分触发事件
//!
//! 入站请求以 `event_type` 字符串加 JSON 负载的形式到达，在此转换为封闭的枚举，
//! 之后的评估按枚举穷尽匹配，新增事件类型由编译器检查覆盖。

use serde_json::Value;

use crate::error::{Result, RuleError};

/// 可产生积分的事件
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PointsTrigger {
    /// 按电量计分的充电会话
    ChargeKwh { kwh: f64 },
    Referral,
    Rating,
    FirstCharge,
    /// 连续登录，`streak_days` 从 1 开始
    DailyLogin { streak_days: u32 },
}

impl PointsTrigger {
    /// 可识别的事件类型
    pub const EVENT_TYPES: [&'static str; 5] = [
        "CHARGE_KWH",
        "REFERRAL",
        "RATING",
        "FIRST_CHARGE",
        "DAILY_LOGIN",
    ];

    /// 事件类型的外部名称
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::ChargeKwh { .. } => "CHARGE_KWH",
            Self::Referral => "REFERRAL",
            Self::Rating => "RATING",
            Self::FirstCharge => "FIRST_CHARGE",
            Self::DailyLogin { .. } => "DAILY_LOGIN",
        }
    }

    /// 规则文档中对应的规则名
    pub fn rule_name(&self) -> &'static str {
        match self {
            Self::ChargeKwh { .. } => "charge_kwh",
            Self::Referral => "referral",
            Self::Rating => "rating",
            Self::FirstCharge => "first_charge",
            Self::DailyLogin { .. } => "daily_login",
        }
    }

    /// 从事件类型名与 JSON 负载构造
    ///
    /// - CHARGE_KWH 读取 `unit_amount`（兼容 `kwh`），须为有限非负数
    /// - DAILY_LOGIN 读取 `streak_days`，缺省为 1，须为正整数
    /// - 其余类型忽略负载
    pub fn from_payload(event_type: &str, payload: &Value) -> Result<Self> {
        match event_type {
            "CHARGE_KWH" => Ok(Self::ChargeKwh {
                kwh: unit_amount(payload)?,
            }),
            "REFERRAL" => Ok(Self::Referral),
            "RATING" => Ok(Self::Rating),
            "FIRST_CHARGE" => Ok(Self::FirstCharge),
            "DAILY_LOGIN" => Ok(Self::DailyLogin {
                streak_days: streak_days(payload)?,
            }),
            other => Err(RuleError::UnknownEventType(other.to_string())),
        }
    }
}

fn unit_amount(payload: &Value) -> Result<f64> {
    let value = payload
        .get("unit_amount")
        .or_else(|| payload.get("kwh"))
        .filter(|v| !v.is_null())
        .ok_or_else(|| RuleError::InvalidPayload("缺少 unit_amount".to_string()))?;

    let amount = value
        .as_f64()
        .ok_or_else(|| RuleError::InvalidPayload(format!("unit_amount 不是数值: {value}")))?;

    if !amount.is_finite() || amount < 0.0 {
        return Err(RuleError::InvalidPayload(format!(
            "unit_amount 必须为非负数: {amount}"
        )));
    }
    Ok(amount)
}

fn streak_days(payload: &Value) -> Result<u32> {
    match payload.get("streak_days") {
        None | Some(Value::Null) => Ok(1),
        Some(value) => value
            .as_u64()
            .filter(|days| *days >= 1)
            .map(|days| u32::try_from(days).unwrap_or(u32::MAX))
            .ok_or_else(|| RuleError::InvalidPayload(format!("streak_days 无效: {value}"))),
    }
}
