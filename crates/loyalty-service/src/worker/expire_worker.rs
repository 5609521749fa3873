//! 兑换过期清扫 Worker
//!
//! 按 cron 表达式定时触发 `expire_stale`。多实例部署时通过作业锁避免重复执行，
//! 拿不到锁的实例本轮跳过。

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use cron::Schedule;
use tokio::sync::watch;
use tracing::{error, info, warn};

use loyalty_shared::observability::metrics;

use crate::error::{PointsError, Result};
use crate::lock::LockManager;
use crate::models::ExpirySummary;
use crate::repository::LedgerStore;
use crate::service::RedemptionService;

const LOCK_KEY: &str = "expire-stale-redemptions";

pub struct ExpireWorker<S: LedgerStore> {
    service: Arc<RedemptionService<S>>,
    locks: Option<Arc<LockManager>>,
    schedule: Schedule,
    lock_ttl: Duration,
}

impl<S: LedgerStore> ExpireWorker<S> {
    /// `locks` 为 None 时不加锁（单实例或测试）
    pub fn new(
        service: Arc<RedemptionService<S>>,
        locks: Option<Arc<LockManager>>,
        cron_expression: &str,
        lock_ttl: Duration,
    ) -> Result<Self> {
        let schedule = Schedule::from_str(cron_expression).map_err(|e| {
            PointsError::Validation(format!("无效的 cron 表达式 {cron_expression}: {e}"))
        })?;

        Ok(Self {
            service,
            locks,
            schedule,
            lock_ttl,
        })
    }

    /// `after` 之后的下一次触发时间
    pub fn next_fire(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&after).next()
    }

    /// 执行一轮清扫；其他实例持有锁时返回 None
    pub async fn run_once(&self) -> Result<Option<ExpirySummary>> {
        let guard = match &self.locks {
            Some(locks) => match locks.try_acquire(LOCK_KEY, Some(self.lock_ttl)).await? {
                Some(guard) => Some(guard),
                None => {
                    info!("其他实例正在执行过期清扫，本轮跳过");
                    return Ok(None);
                }
            },
            None => None,
        };

        let result = self.service.expire_stale(Utc::now()).await;

        if let Some(guard) = guard {
            if let Err(e) = guard.release().await {
                warn!(error = %e, "释放过期清扫锁失败，等待 TTL 过期");
            }
        }
        metrics::set_worker_last_run("expire_worker");

        result.map(Some)
    }

    /// 主循环：等待下一次触发或关闭信号
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            next_fire = ?self.next_fire(Utc::now()),
            refund_on_expire = self.service.config().refund_on_expire,
            "ExpireWorker 已启动"
        );

        loop {
            let Some(next) = self.next_fire(Utc::now()) else {
                warn!("cron 表达式没有后续触发时间，ExpireWorker 退出");
                break;
            };
            let wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
                _ = tokio::time::sleep(wait) => {}
            }

            if let Err(e) = self.run_once().await {
                error!(error = %e, "过期清扫出错");
            }
        }

        info!("ExpireWorker 已停止");
    }
}
