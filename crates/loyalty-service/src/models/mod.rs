//! 积分服务领域模型

pub mod enums;
pub mod outbox;
pub mod points_event;
pub mod redemption;
pub mod reward;

pub use enums::{PointsEventType, RedemptionStatus};
pub use outbox::{NewOutboxMessage, OutboxMessage};
pub use points_event::{PointsEvent, PointsEventDraft};
pub use redemption::{ExpirySummary, Redemption};
pub use reward::RewardCatalogEntry;
