//! Outbox 通知分发
//!
//! 通知消息在业务事务内入队（见 `UnitOfWork::enqueue`），提交后由分发器异步投递，
//! 投递成败不影响已提交的账本写入。投递语义为至少一次，下游按事件 ID 或兑换 ID 去重。

mod dispatcher;
mod publisher;

use std::sync::Arc;

use tokio::sync::Notify;

pub use dispatcher::{DispatchStats, OutboxDispatcher};
pub use publisher::{EventPublisher, KafkaEventPublisher, LogEventPublisher};

#[cfg(test)]
pub use publisher::MockEventPublisher;

/// 唤醒分发器的信号
///
/// 提交后调用 `notify`，分发器无需等到下一个轮询周期
#[derive(Clone, Default)]
pub struct OutboxSignal(Arc<Notify>);

impl OutboxSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notify(&self) {
        self.0.notify_one();
    }

    pub async fn notified(&self) {
        self.0.notified().await;
    }
}
