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

use crate::config::ObservabilityConfig;

/// Metrics 资源守卫
pub struct MetricsHandle {
    _server_handle: tokio::task::JoinHandle<()>,
}

/// 初始化 Prometheus 指标导出，在 metrics_port 上暴露 `/metrics`
pub async fn init(config: &ObservabilityConfig, service_name: &str) -> Result<MetricsHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    register_common_metrics(service_name);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));
    let server_handle = start_metrics_server(addr, handle).await?;

    Ok(MetricsHandle {
        _server_handle: server_handle,
    })
}

/// 注册业务指标描述
fn register_common_metrics(service_name: &str) {
    metrics::describe_counter!("http_requests_total", "Total number of HTTP requests");
    metrics::describe_histogram!(
        "http_request_duration_seconds",
        "HTTP request duration in seconds"
    );

    metrics::describe_counter!(
        "request_transitions_total",
        "Committed request status transitions"
    );
    metrics::describe_counter!(
        "request_transition_rejections_total",
        "Rejected request status transitions"
    );
    metrics::describe_counter!("thread_messages_total", "Messages appended to threads");
    metrics::describe_counter!(
        "notification_jobs_enqueued_total",
        "Notification jobs handed to the worker"
    );
    metrics::describe_counter!("worker_jobs_total", "Worker jobs by final outcome");
    metrics::describe_counter!("worker_job_attempts_total", "Worker job attempts");
    metrics::describe_counter!("notification_sends_total", "Outbound notification sends");

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
    info!("指标服务监听于 {}", addr);

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("指标服务异常退出: {}", e);
        }
    });

    Ok(server_handle)
}

// ============================================================================
// 指标记录函数
// ============================================================================

/// 记录 HTTP 请求
#[inline]
pub fn record_http_request(method: &str, path: &str, status: u16, duration_secs: f64) {
    let status_str = status.to_string();
    metrics::counter!(
        "http_requests_total",
        "method" => method.to_string(),
        "path" => path.to_string(),
        "status" => status_str.clone()
    )
    .increment(1);

    metrics::histogram!(
        "http_request_duration_seconds",
        "method" => method.to_string(),
        "path" => path.to_string(),
        "status" => status_str
    )
    .record(duration_secs);
}

/// 记录一次已提交的状态迁移
#[inline]
pub fn record_transition(from: &str, to: &str) {
    metrics::counter!(
        "request_transitions_total",
        "from" => from.to_string(),
        "to" => to.to_string()
    )
    .increment(1);
}

/// 记录被拒绝的状态迁移，reason 为错误键
#[inline]
pub fn record_transition_rejection(reason: &str) {
    metrics::counter!(
        "request_transition_rejections_total",
        "reason" => reason.to_string()
    )
    .increment(1);
}

#[inline]
pub fn record_thread_message() {
    metrics::counter!("thread_messages_total").increment(1);
}

/// 记录投递给 Worker 的通知任务
#[inline]
pub fn record_notification_enqueued(template: &str, channel: &str) {
    metrics::counter!(
        "notification_jobs_enqueued_total",
        "template" => template.to_string(),
        "channel" => channel.to_string()
    )
    .increment(1);
}

/// 记录 Worker 任务结果与尝试次数
#[inline]
pub fn record_worker_job(job: &str, outcome: &str, attempts: u32) {
    metrics::counter!(
        "worker_jobs_total",
        "job" => job.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);

    metrics::counter!("worker_job_attempts_total", "job" => job.to_string())
        .increment(u64::from(attempts));
}

/// 记录一次外发通知
#[inline]
pub fn record_notification_send(channel: &str, outcome: &str) {
    metrics::counter!(
        "notification_sends_total",
        "channel" => channel.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}
