//! 远程错误上报
//!
//! 进程边界上的错误（API 内部错误、Worker 永久失败）都会发往远程上报服务。
//! 配置了 Rollbar token 时发往 Rollbar，否则只记日志。上报失败只记录，不向上传播。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use tracing::{error, warn};

use crate::config::RollbarConfig;
use crate::error::{AppError, ErrorCategory, ErrorKey};

const ROLLBAR_ENDPOINT: &str = "https://api.rollbar.com/api/1/item/";

/// 一条待上报的错误
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorReport {
    pub key: ErrorKey,
    pub category: ErrorCategory,
    pub message: String,
    /// 出错位置，如 `worker:new_message`、`api:POST /api/requests/{id}/status`
    pub context: String,
}

impl ErrorReport {
    pub fn from_error(err: &AppError, context: impl Into<String>) -> Self {
        Self {
            key: err.key(),
            category: err.category(),
            message: err.to_string(),
            context: context.into(),
        }
    }
}

/// 错误上报能力
#[async_trait]
pub trait ErrorReporter: Send + Sync {
    async fn report(&self, report: ErrorReport);
}

/// 仅写日志的上报器（未配置 Rollbar 时使用）
pub struct LogReporter;

#[async_trait]
impl ErrorReporter for LogReporter {
    async fn report(&self, report: ErrorReport) {
        error!(
            key = %report.key,
            category = %report.category,
            context = %report.context,
            "{}",
            report.message
        );
    }
}

/// Rollbar 上报器
pub struct RollbarReporter {
    client: reqwest::Client,
    token: String,
    environment: String,
    code_version: String,
    endpoint: String,
}

impl RollbarReporter {
    pub fn new(config: &RollbarConfig, code_version: &str) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| AppError::Config(format!("构建 Rollbar HTTP 客户端失败: {e}")))?;

        Ok(Self {
            client,
            token: config.token.clone(),
            environment: config.environment.clone(),
            code_version: code_version.to_string(),
            endpoint: ROLLBAR_ENDPOINT.to_string(),
        })
    }

    fn payload(&self, report: &ErrorReport) -> serde_json::Value {
        json!({
            "data": {
                "environment": self.environment,
                "level": "error",
                "platform": "rust",
                "language": "rust",
                "code_version": self.code_version,
                "body": {
                    "message": { "body": report.message }
                },
                "custom": {
                    "key": report.key,
                    "category": report.category,
                    "context": report.context,
                }
            }
        })
    }
}

#[async_trait]
impl ErrorReporter for RollbarReporter {
    async fn report(&self, report: ErrorReport) {
        // 日志里始终保留一份
        LogReporter.report(report.clone()).await;

        let result = self
            .client
            .post(&self.endpoint)
            .header("X-Rollbar-Access-Token", &self.token)
            .json(&self.payload(&report))
            .send()
            .await
            .and_then(|resp| resp.error_for_status());

        if let Err(e) = result {
            warn!(error = %e, "Rollbar 上报失败");
        }
    }
}

/// 根据配置选择上报器
pub fn build_reporter(config: &RollbarConfig, code_version: &str) -> Result<Arc<dyn ErrorReporter>, AppError> {
    if config.token.is_empty() {
        Ok(Arc::new(LogReporter))
    } else {
        Ok(Arc::new(RollbarReporter::new(config, code_version)?))
    }
}

/// 记录所有上报内容，测试用
#[derive(Default)]
pub struct RecordingReporter {
    reports: Mutex<Vec<ErrorReport>>,
}

impl RecordingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reports(&self) -> Vec<ErrorReport> {
        self.reports.lock().clone()
    }
}

#[async_trait]
impl ErrorReporter for RecordingReporter {
    async fn report(&self, report: ErrorReport) {
        self.reports.lock().push(report);
    }
}
