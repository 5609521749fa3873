//! 积分服务
//!
//! 启动 outbox 分发器与兑换过期清扫 Worker；入站 API 由上游网关层提供。

use std::sync::Arc;

use loyalty::{
    EventPublisher, ExpireWorker, KafkaEventPublisher, Ledger, LockConfig, LockManager,
    LogEventPublisher, MIGRATOR, OutboxDispatcher, OutboxRepository, OutboxSignal,
    PointsLedgerRepository, RedemptionRepository, RedemptionService, RewardRepository,
};
use loyalty_shared::{
    config::AppConfig,
    database::Database,
    error::LoyaltyError,
    kafka::KafkaProducer,
    observability,
    retry::{RetryPolicy, retry_with_policy},
};
use rule_engine::{RuleEvaluator, RulesConfig};
use tokio::sync::watch;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 配置或规则文档有误时进程不能启动
    let config = AppConfig::load("loyalty-service")?;
    let _guard = observability::init(&config.observability).await?;

    info!(environment = %config.environment, "Starting loyalty-service");

    let rules = RulesConfig::load(&config.rules_path)?;
    let evaluator = Arc::new(RuleEvaluator::new(rules));
    info!(
        rules_path = %config.rules_path,
        max_points_per_day = evaluator.settings().max_points_per_day,
        "积分规则已加载"
    );

    // 基础设施
    let db = retry_with_policy(
        &RetryPolicy::default(),
        "connect_database",
        LoyaltyError::is_retryable,
        || Database::connect(&config.database),
    )
    .await?;
    if config.database.run_migrations {
        db.run_migrations(&MIGRATOR).await?;
    }
    let pool = db.pool().clone();

    let publisher: Arc<dyn EventPublisher> = if config.kafka.enabled {
        Arc::new(KafkaEventPublisher::new(KafkaProducer::new(&config.kafka)?))
    } else {
        warn!(
            production = config.is_production(),
            "Kafka 未启用，通知只写入日志"
        );
        Arc::new(LogEventPublisher)
    };

    let redis_client = if config.redis.enabled {
        Some(redis::Client::open(config.redis.url.as_str())?)
    } else {
        None
    };
    let locks = Arc::new(LockManager::new(
        redis_client,
        pool.clone(),
        LockConfig {
            default_ttl: config.redemption.expire_lock_ttl(),
        },
    ));

    // 服务
    let signal = OutboxSignal::new();
    let ledger = Ledger::new(
        Arc::new(
            PointsLedgerRepository::new(pool.clone())
                .with_lock_timeout(config.database.user_lock_timeout()),
        ),
        signal.clone(),
    );
    let redemption = Arc::new(RedemptionService::new(
        ledger,
        Arc::new(RewardRepository::new(pool.clone())),
        Arc::new(RedemptionRepository::new(pool.clone())),
        config.redemption.clone(),
    ));

    let dispatcher = OutboxDispatcher::new(
        Arc::new(OutboxRepository::new(pool.clone())),
        publisher,
        config.outbox.clone(),
    );
    let expire_worker = ExpireWorker::new(
        redemption,
        Some(locks),
        &config.redemption.expire_cron,
        config.redemption.expire_lock_ttl(),
    )?;

    // 后台任务
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let dispatcher_handle = tokio::spawn({
        let shutdown = shutdown_rx.clone();
        async move { dispatcher.run(shutdown, signal).await }
    });
    let worker_handle = tokio::spawn(async move { expire_worker.run(shutdown_rx).await });

    shutdown_signal().await;

    // 接收端已退出时 send 返回错误，无需处理
    let _ = shutdown_tx.send(true);
    let (dispatcher_result, worker_result) = tokio::join!(dispatcher_handle, worker_handle);
    if let Err(e) = dispatcher_result {
        error!(error = %e, "Outbox 分发器异常退出");
    }
    if let Err(e) = worker_result {
        error!(error = %e, "ExpireWorker 异常退出");
    }

    db.close().await;
    info!("loyalty-service shutdown complete");

    Ok(())
}

/// 监听关闭信号
///
/// K8s 通过 SIGTERM 通知 Pod 停止；本地开发通过 Ctrl+C。
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "注册 Ctrl+C 处理器失败");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "注册 SIGTERM 处理器失败");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, initiating graceful shutdown..."),
        _ = terminate => info!("Received SIGTERM, initiating graceful shutdown..."),
    }
}
