//! Prometheus 指标模块
//!
//! 基于 metrics crate 和 metrics-exporter-prometheus 实现指标收集与导出。
//! 指标通过独立的 HTTP 端口暴露，供 Prometheus 抓取。

use anyhow::Result;
use axum::{Router, routing::get};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{error, info};

use super::ObservabilityConfig;

/// Metrics 资源守卫
pub struct MetricsHandle {
    _server_handle: tokio::task::JoinHandle<()>,
}

/// 初始化 Prometheus 指标导出
///
/// 启动一个独立的 HTTP 服务器在指定端口暴露 `/metrics` 与 `/health`。
pub async fn init(config: &ObservabilityConfig) -> Result<MetricsHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    register_common_metrics(&config.service_name);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));
    let server_handle = start_metrics_server(addr, handle).await?;

    Ok(MetricsHandle {
        _server_handle: server_handle,
    })
}

/// 注册指标描述，会出现在 /metrics 的 HELP 注释中
fn register_common_metrics(service_name: &str) {
    metrics::describe_counter!(
        "points_accruals_total",
        "Total number of accrual requests by event type and outcome"
    );
    metrics::describe_counter!("points_awarded_total", "Total points credited by accrual");

    metrics::describe_counter!("redemptions_total", "Total number of redemptions");
    metrics::describe_histogram!(
        "redemption_duration_seconds",
        "Redemption duration in seconds"
    );

    metrics::describe_counter!(
        "redemptions_expired_total",
        "Pending redemptions transitioned to EXPIRED by the sweep"
    );
    metrics::describe_counter!(
        "redemption_expiry_failures_total",
        "Rows the expiry sweep failed to update"
    );

    metrics::describe_counter!(
        "outbox_dispatch_total",
        "Outbox deliveries by topic and outcome"
    );
    metrics::describe_gauge!(
        "worker_last_run_timestamp",
        "Unix timestamp of the last completed worker run"
    );

    metrics::counter!("service_starts_total", "service" => service_name.to_string()).increment(1);
}

/// 启动指标 HTTP 服务器
async fn start_metrics_server(
    addr: SocketAddr,
    handle: PrometheusHandle,
) -> Result<tokio::task::JoinHandle<()>> {
    let app = Router::new()
        .route("/metrics", get(move || std::future::ready(handle.render())))
        .route("/health", get(|| async { "OK" }));

    let listener = TcpListener::bind(addr).await?;
    info!("Metrics server listening on {}", addr);

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Metrics server error: {}", e);
        }
    });

    Ok(server_handle)
}

// ============================================================================
// 便捷的指标记录函数
// ============================================================================

/// 记录一次积分累计
#[inline]
pub fn record_accrual(event_type: &str, status: &str, points: i64) {
    metrics::counter!(
        "points_accruals_total",
        "event_type" => event_type.to_string(),
        "status" => status.to_string()
    )
    .increment(1);

    if points > 0 {
        metrics::counter!(
            "points_awarded_total",
            "event_type" => event_type.to_string()
        )
        .increment(points as u64);
    }
}

/// 记录兑换
#[inline]
pub fn record_redemption(status: &str, duration_secs: f64) {
    metrics::counter!("redemptions_total", "status" => status.to_string()).increment(1);
    metrics::histogram!("redemption_duration_seconds", "status" => status.to_string())
        .record(duration_secs);
}

/// 记录过期清扫结果
#[inline]
pub fn record_expiry(expired: u64, failed: u64) {
    metrics::counter!("redemptions_expired_total").increment(expired);
    metrics::counter!("redemption_expiry_failures_total").increment(failed);
}

/// 记录 outbox 投递
#[inline]
pub fn record_outbox_dispatch(topic: &str, status: &str) {
    metrics::counter!(
        "outbox_dispatch_total",
        "topic" => topic.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// 更新后台任务最近一次运行时间
#[inline]
pub fn set_worker_last_run(worker: &str) {
    metrics::gauge!("worker_last_run_timestamp", "worker" => worker.to_string())
        .set(chrono::Utc::now().timestamp() as f64);
}
