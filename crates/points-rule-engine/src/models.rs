//! 规则文档模型
//!
//! 对应 rules.yaml：`rules` 为规则名到参数的映射，`settings` 为全局开关与上限。

use std::collections::HashMap;
use std::path::Path;

use config::{Config, File, FileFormat};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Result, RuleError};

/// 单条规则参数
///
/// 各字段均可选，由评估时按事件类型取用；缺少所需字段报 `ConfigMissing`。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    /// 每单位（如每 kWh）积分
    #[serde(default, alias = "points_per_kwh")]
    pub points_per_unit: Option<f64>,
    /// 固定积分
    #[serde(default)]
    pub points: Option<i64>,
    /// 连续登录首日积分
    #[serde(default)]
    pub base_points: Option<i64>,
    /// 连续登录每日复利倍数，缺省 1.0
    #[serde(default)]
    pub streak_multiplier: Option<f64>,
    /// 复利计算的最大天数，缺省 1
    #[serde(default)]
    pub max_streak_days: Option<u32>,
    #[serde(default)]
    pub description: String,
}

/// 全局设置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// 每用户每日积分上限，0 表示不限
    pub max_points_per_day: i64,
    /// 单位计费事件的单次积分上限，0 时按量计分事件不得分
    pub max_points_per_event: i64,
    pub enable_streak_bonus: bool,
    pub enable_first_charge_bonus: bool,
}

/// 规则文档
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RulesConfig {
    #[serde(default)]
    pub rules: HashMap<String, Rule>,
    pub settings: Settings,
}

impl RulesConfig {
    /// 从 YAML 文件加载并校验
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let config: Self = Config::builder()
            .add_source(File::from(path).format(FileFormat::Yaml).required(true))
            .build()?
            .try_deserialize()?;
        config.validate()?;

        info!(
            path = %path.display(),
            rules = config.rules.len(),
            "积分规则已加载"
        );
        Ok(config)
    }

    /// 从 YAML 文本解析并校验
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = Config::builder()
            .add_source(File::from_str(yaml, FileFormat::Yaml))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// 按规则名查找
    pub fn rule(&self, name: &str) -> Option<&Rule> {
        self.rules.get(name)
    }

    /// 拒绝会产生负积分或非有限数值的配置
    pub fn validate(&self) -> Result<()> {
        let settings = &self.settings;
        if settings.max_points_per_day < 0 || settings.max_points_per_event < 0 {
            return Err(RuleError::Config(
                "settings 中的积分上限不能为负数".to_string(),
            ));
        }

        for (name, rule) in &self.rules {
            let invalid = |field: &str| {
                RuleError::Config(format!("rules.{name}.{field} 取值无效"))
            };

            if let Some(rate) = rule.points_per_unit
                && (!rate.is_finite() || rate < 0.0)
            {
                return Err(invalid("points_per_unit"));
            }
            if rule.points.is_some_and(|p| p < 0) {
                return Err(invalid("points"));
            }
            if rule.base_points.is_some_and(|p| p < 0) {
                return Err(invalid("base_points"));
            }
            if let Some(multiplier) = rule.streak_multiplier
                && (!multiplier.is_finite() || multiplier < 0.0)
            {
                return Err(invalid("streak_multiplier"));
            }
        }
        Ok(())
    }
}
