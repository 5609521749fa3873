//! 积分评估器
//!
//! 纯函数：给定触发事件与不可变的规则文档，返回积分数额。
//! 评估器看不到用户维度的累计量，`max_points_per_day` 由调用方在累计路径上执行。

use serde_json::Value;
use tracing::debug;

use crate::error::{Result, RuleError};
use crate::event::PointsTrigger;
use crate::models::{Rule, RulesConfig, Settings};

/// 积分规则评估器
#[derive(Debug, Clone)]
pub struct RuleEvaluator {
    config: RulesConfig,
}

impl RuleEvaluator {
    /// 以所有权接收已校验的规则文档
    pub fn new(config: RulesConfig) -> Self {
        Self { config }
    }

    pub fn settings(&self) -> &Settings {
        &self.config.settings
    }

    pub fn config(&self) -> &RulesConfig {
        &self.config
    }

    /// 评估触发事件
    ///
    /// 失败时不返回任何积分；成功结果恒为非负。
    pub fn evaluate(&self, trigger: &PointsTrigger) -> Result<i64> {
        let settings = &self.config.settings;

        let points = match *trigger {
            PointsTrigger::ChargeKwh { kwh } => self.unit_rate(trigger.rule_name(), kwh)?,
            PointsTrigger::Referral | PointsTrigger::Rating => self.flat(trigger.rule_name())?,
            PointsTrigger::FirstCharge => {
                if !settings.enable_first_charge_bonus {
                    0
                } else {
                    self.flat(trigger.rule_name())?
                }
            }
            PointsTrigger::DailyLogin { streak_days } => {
                if !settings.enable_streak_bonus {
                    0
                } else {
                    self.streak(trigger.rule_name(), streak_days)?
                }
            }
        };

        debug!(event_type = trigger.event_type(), points, "规则评估完成");
        Ok(points)
    }

    /// 从外部事件类型名与负载直接评估
    pub fn evaluate_raw(&self, event_type: &str, payload: &Value) -> Result<(PointsTrigger, i64)> {
        let trigger = PointsTrigger::from_payload(event_type, payload)?;
        let points = self.evaluate(&trigger)?;
        Ok((trigger, points))
    }

    fn rule(&self, name: &str) -> Result<&Rule> {
        self.config
            .rule(name)
            .ok_or_else(|| RuleError::ConfigMissing(name.to_string()))
    }

    /// floor(amount × rate)，再以 max_points_per_event 封顶
    fn unit_rate(&self, name: &str, amount: f64) -> Result<i64> {
        let rate = self
            .rule(name)?
            .points_per_unit
            .ok_or_else(|| RuleError::ConfigMissing(format!("{name}.points_per_unit")))?;

        // f64 -> i64 的 as 转换在溢出时饱和
        let points = (amount * rate).floor() as i64;

        Ok(points.min(self.config.settings.max_points_per_event))
    }

    fn flat(&self, name: &str) -> Result<i64> {
        self.rule(name)?
            .points
            .ok_or_else(|| RuleError::ConfigMissing(format!("{name}.points")))
    }

    /// 每多一天乘一次倍数并立即截断，超过 max_streak_days 的天数不再复利
    fn streak(&self, name: &str, streak_days: u32) -> Result<i64> {
        let rule = self.rule(name)?;
        let base = rule
            .base_points
            .ok_or_else(|| RuleError::ConfigMissing(format!("{name}.base_points")))?;
        let multiplier = rule.streak_multiplier.unwrap_or(1.0);
        let max_days = rule.max_streak_days.unwrap_or(1).max(1);

        let mut points = base;
        for _ in 1..streak_days.min(max_days) {
            points = (points as f64 * multiplier).floor() as i64;
        }
        Ok(points)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Rule;
    use std::collections::HashMap;

    fn evaluator(settings: Settings) -> RuleEvaluator {
        let mut rules = HashMap::new();
        rules.insert(
            "charge_kwh".to_string(),
            Rule {
                points_per_unit: Some(10.0),
                ..Default::default()
            },
        );
        rules.insert(
            "daily_login".to_string(),
            Rule {
                base_points: Some(10),
                streak_multiplier: Some(1.5),
                max_streak_days: Some(7),
                ..Default::default()
            },
        );
        rules.insert(
            "first_charge".to_string(),
            Rule {
                points: Some(200),
                ..Default::default()
            },
        );
        RuleEvaluator::new(RulesConfig { rules, settings })
    }

    fn settings() -> Settings {
        Settings {
            max_points_per_day: 1000,
            max_points_per_event: 500,
            enable_streak_bonus: true,
            enable_first_charge_bonus: true,
        }
    }

    #[test]
    fn test_charge_floor() {
        let e = evaluator(settings());
        assert_eq!(e.evaluate(&PointsTrigger::ChargeKwh { kwh: 7.0 }).unwrap(), 70);
        assert_eq!(e.evaluate(&PointsTrigger::ChargeKwh { kwh: 2.39 }).unwrap(), 23);
    }

    #[test]
    fn test_charge_cap_is_upper_bound_only() {
        let e = evaluator(Settings {
            max_points_per_event: 50,
            ..settings()
        });
        assert_eq!(e.evaluate(&PointsTrigger::ChargeKwh { kwh: 10.0 }).unwrap(), 50);
        assert_eq!(e.evaluate(&PointsTrigger::ChargeKwh { kwh: 1.0 }).unwrap(), 10);
    }

    #[test]
    fn test_zero_cap_awards_nothing() {
        let e = evaluator(Settings {
            max_points_per_event: 0,
            ..settings()
        });
        assert_eq!(e.evaluate(&PointsTrigger::ChargeKwh { kwh: 100.0 }).unwrap(), 0);
        // 封顶只作用于按量计分
        assert_eq!(e.evaluate(&PointsTrigger::FirstCharge).unwrap(), 200);
    }

    #[test]
    fn test_streak_truncates_each_step() {
        let e = evaluator(settings());
        let points = |days| e.evaluate(&PointsTrigger::DailyLogin { streak_days: days }).unwrap();
        assert_eq!(points(1), 10);
        assert_eq!(points(2), 15);
        assert_eq!(points(3), 22);
        // 10 → 15 → 22 → 33 → 49 → 73 → 109
        assert_eq!(points(7), 109);
        assert_eq!(points(30), 109);
    }

    #[test]
    fn test_disabled_bonuses_return_zero() {
        let e = evaluator(Settings {
            enable_streak_bonus: false,
            enable_first_charge_bonus: false,
            ..settings()
        });
        assert_eq!(e.evaluate(&PointsTrigger::DailyLogin { streak_days: 5 }).unwrap(), 0);
        assert_eq!(e.evaluate(&PointsTrigger::FirstCharge).unwrap(), 0);
    }

    #[test]
    fn test_missing_rule_is_config_missing() {
        let e = evaluator(settings());
        let err = e.evaluate(&PointsTrigger::Referral).unwrap_err();
        assert!(matches!(err, RuleError::ConfigMissing(name) if name == "referral"));
    }

    #[test]
    fn test_missing_field_names_rule_and_field() {
        let mut config = evaluator(settings()).config().clone();
        config.rules.insert("rating".to_string(), Rule::default());
        let e = RuleEvaluator::new(config);

        let err = e.evaluate(&PointsTrigger::Rating).unwrap_err();
        assert_eq!(err.to_string(), "规则配置缺失: rating.points");
    }
}
