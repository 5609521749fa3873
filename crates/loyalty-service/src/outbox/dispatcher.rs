//! Outbox 分发器
//!
//! 认领一批到期消息（带租约，多实例并发安全），逐条发布：
//! 成功标记已投递；失败按指数退避安排下次投递，超过最大次数进入死信。

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use loyalty_shared::config::OutboxConfig;
use loyalty_shared::observability::metrics;
use loyalty_shared::retry::RetryPolicy;

use super::OutboxSignal;
use super::publisher::EventPublisher;
use crate::error::Result;
use crate::models::OutboxMessage;
use crate::repository::OutboxStore;

/// 单轮分发结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub delivered: usize,
    pub retried: usize,
    pub dead: usize,
}

impl DispatchStats {
    pub fn total(&self) -> usize {
        self.delivered + self.retried + self.dead
    }
}

pub struct OutboxDispatcher {
    store: Arc<dyn OutboxStore>,
    publisher: Arc<dyn EventPublisher>,
    config: OutboxConfig,
    retry: RetryPolicy,
}

impl OutboxDispatcher {
    pub fn new(
        store: Arc<dyn OutboxStore>,
        publisher: Arc<dyn EventPublisher>,
        config: OutboxConfig,
    ) -> Self {
        let retry = RetryPolicy::for_delivery(config.max_attempts.max(1) as u32);
        Self {
            store,
            publisher,
            config,
            retry,
        }
    }

    /// 分发一批消息
    pub async fn dispatch_once(&self) -> Result<DispatchStats> {
        let lease = chrono::Duration::seconds(self.config.lease_seconds);
        let batch = self.store.claim_batch(self.config.batch_size, lease).await?;

        let mut stats = DispatchStats::default();
        for message in batch {
            match self
                .publisher
                .publish(&message.topic, &message.message_key, &message.payload)
                .await
            {
                Ok(()) => {
                    self.store.mark_delivered(message.id).await?;
                    metrics::record_outbox_dispatch(&message.topic, "delivered");
                    debug!(message_id = %message.id, topic = %message.topic, "通知已投递");
                    stats.delivered += 1;
                }
                Err(e) => {
                    if self.handle_failure(&message, &e.to_string()).await? {
                        stats.retried += 1;
                    } else {
                        stats.dead += 1;
                    }
                }
            }
        }

        Ok(stats)
    }

    /// 记录投递失败，返回是否还会重试
    async fn handle_failure(&self, message: &OutboxMessage, error: &str) -> Result<bool> {
        // attempts 含本次，已失败次数 = attempts - 1
        let failed_before = message.attempts.max(1) as u32 - 1;

        if self.retry.should_retry(failed_before) {
            let delay = self.retry.delay_for_attempt(failed_before);
            let retry_at = Utc::now()
                + chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::seconds(300));
            warn!(
                message_id = %message.id,
                topic = %message.topic,
                attempts = message.attempts,
                retry_at = %retry_at,
                error,
                "通知投递失败，稍后重试"
            );
            self.store
                .mark_failed(message.id, error, Some(retry_at))
                .await?;
            metrics::record_outbox_dispatch(&message.topic, "retry");
            Ok(true)
        } else {
            error!(
                message_id = %message.id,
                topic = %message.topic,
                attempts = message.attempts,
                error,
                "通知投递次数耗尽，进入死信"
            );
            self.store.mark_failed(message.id, error, None).await?;
            metrics::record_outbox_dispatch(&message.topic, "dead");
            Ok(false)
        }
    }

    /// 主循环：轮询或被唤醒后分发，直到收到关闭信号
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>, signal: OutboxSignal) {
        info!(
            poll_interval_ms = self.config.poll_interval_ms,
            batch_size = self.config.batch_size,
            "Outbox 分发器已启动"
        );

        loop {
            let drained = match self.dispatch_once().await {
                Ok(stats) => (stats.total() as i64) < self.config.batch_size,
                Err(e) => {
                    error!(error = %e, "Outbox 分发出错");
                    true
                }
            };
            metrics::set_worker_last_run("outbox_dispatcher");

            if *shutdown.borrow() {
                break;
            }
            // 整批取满说明还有积压，立即进入下一轮
            if !drained {
                continue;
            }

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = signal.notified() => {}
                _ = tokio::time::sleep(self.config.poll_interval()) => {}
            }
        }

        info!("Outbox 分发器已停止");
    }
}
