//! 规则引擎错误类型

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuleError {
    /// 规则文档缺失或格式错误，启动阶段致命
    #[error("规则配置错误: {0}")]
    Config(String),

    #[error("未知事件类型: {0}")]
    UnknownEventType(String),

    /// 事件类型已识别但对应规则未配置
    #[error("规则配置缺失: {0}")]
    ConfigMissing(String),

    #[error("事件负载无效: {0}")]
    InvalidPayload(String),
}

impl RuleError {
    /// 获取错误码
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Config(_) => "RULE_CONFIG_ERROR",
            Self::UnknownEventType(_) => "UNKNOWN_EVENT_TYPE",
            Self::ConfigMissing(_) => "RULE_CONFIG_MISSING",
            Self::InvalidPayload(_) => "INVALID_PAYLOAD",
        }
    }
}

impl From<config::ConfigError> for RuleError {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RuleError>;
