//! 积分服务错误类型
//!
//! 定义服务层的业务错误和系统错误

use thiserror::Error;
use uuid::Uuid;

use loyalty_shared::error::LoyaltyError;
use rule_engine::RuleError;

/// 积分服务错误类型
#[derive(Debug, Error)]
pub enum PointsError {
    // === 请求校验 ===
    #[error("参数校验失败: {0}")]
    Validation(String),

    // === 规则评估 ===
    #[error(transparent)]
    Rule(#[from] RuleError),

    // === 奖励与兑换 ===
    #[error("奖励不存在: {0}")]
    RewardNotFound(Uuid),

    #[error("奖励已下线: {0}")]
    RewardInactive(Uuid),

    #[error("积分余额不足: 需要 {required}, 可用 {available}")]
    InsufficientPoints { required: i64, available: i64 },

    #[error("兑换记录不存在: {0}")]
    RedemptionNotFound(Uuid),

    #[error("兑换状态不允许此操作: redemption_id={redemption_id}, current_status={current_status}")]
    InvalidRedemptionStatus {
        redemption_id: Uuid,
        current_status: String,
    },

    #[error("请求已超过截止时间，未提交任何写入")]
    DeadlineExceeded,

    // === 系统错误 ===
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("JSON 序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Redis 错误: {0}")]
    Redis(String),

    #[error("消息发布失败: {0}")]
    Publish(String),

    #[error(transparent)]
    Shared(#[from] LoyaltyError),

    #[error("内部错误: {0}")]
    Internal(String),
}

/// 积分服务 Result 类型别名
pub type Result<T> = std::result::Result<T, PointsError>;

impl PointsError {
    /// 余额不足时的差额
    pub fn shortfall(&self) -> Option<i64> {
        match self {
            Self::InsufficientPoints {
                required,
                available,
            } => Some(required - available),
            _ => None,
        }
    }

    /// 检查是否为可重试的错误
    ///
    /// 存储失败时不会留下部分写入，整个操作可以安全重试。
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Database(_) | Self::Redis(_) | Self::Publish(_) | Self::DeadlineExceeded => true,
            Self::Shared(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// 检查是否为业务错误（非系统错误）
    pub fn is_business_error(&self) -> bool {
        matches!(
            self,
            Self::Validation(_)
                | Self::Rule(_)
                | Self::RewardNotFound(_)
                | Self::RewardInactive(_)
                | Self::InsufficientPoints { .. }
                | Self::RedemptionNotFound(_)
                | Self::InvalidRedemptionStatus { .. }
        )
    }

    /// 获取错误码（用于 API 响应）
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Rule(e) => e.error_code(),
            Self::RewardNotFound(_) => "REWARD_NOT_FOUND",
            Self::RewardInactive(_) => "REWARD_INACTIVE",
            Self::InsufficientPoints { .. } => "INSUFFICIENT_POINTS",
            Self::RedemptionNotFound(_) => "REDEMPTION_NOT_FOUND",
            Self::InvalidRedemptionStatus { .. } => "INVALID_REDEMPTION_STATUS",
            Self::DeadlineExceeded => "DEADLINE_EXCEEDED",
            Self::Database(_) => "DATABASE_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Redis(_) => "REDIS_ERROR",
            Self::Publish(_) => "PUBLISH_ERROR",
            Self::Shared(e) => e.code(),
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

/// 解析 UUID 形式的标识符，失败时返回校验错误
pub(crate) fn parse_id(field: &str, raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw.trim())
        .map_err(|_| PointsError::Validation(format!("{field} 不是合法的 UUID: {raw}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insufficient_points_carries_amounts() {
        let err = PointsError::InsufficientPoints {
            required: 500,
            available: 300,
        };
        assert_eq!(err.shortfall(), Some(200));
        assert_eq!(err.error_code(), "INSUFFICIENT_POINTS");
        assert!(err.to_string().contains("500"));
        assert!(err.to_string().contains("300"));
        assert!(err.is_business_error());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_error_is_retryable() {
        assert!(PointsError::Database(sqlx::Error::PoolTimedOut).is_retryable());
        assert!(PointsError::DeadlineExceeded.is_retryable());
        assert!(!PointsError::Validation("user_id".into()).is_retryable());
        assert!(!PointsError::RewardNotFound(Uuid::nil()).is_retryable());
    }

    #[test]
    fn test_rule_error_code_passes_through() {
        let err = PointsError::from(RuleError::UnknownEventType("PURCHASE".into()));
        assert_eq!(err.error_code(), "UNKNOWN_EVENT_TYPE");
        assert!(err.is_business_error());
        assert_eq!(err.shortfall(), None);
    }

    #[test]
    fn test_parse_id() {
        let id = Uuid::now_v7();
        assert_eq!(parse_id("user_id", &id.to_string()).unwrap(), id);
        assert!(matches!(
            parse_id("user_id", "not-a-uuid"),
            Err(PointsError::Validation(_))
        ));
    }
}
