//! 统一错误处理模块
//!
//! 错误按「类别 × 键」组织：类别决定对外暴露和重试策略，键是客户端可本地化的稳定标识。
//! 使用 thiserror 提供良好的错误信息。

use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// 错误类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorCategory {
    Database,
    /// 输入/校验类错误
    User,
    Forbidden,
    NotFound,
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Database => "Database",
            Self::User => "User",
            Self::Forbidden => "Forbidden",
            Self::NotFound => "NotFound",
            Self::Internal => "Internal",
        };
        f.write_str(s)
    }
}

/// 稳定错误键，客户端据此做本地化
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKey {
    InvalidTransition,
    NoRows,
    #[serde(rename = "FailedToConvertToAPIType")]
    FailedToConvertToApiType,
    ThreadsLoadFailure,
    MessageCreateFailure,
    NotThreadParticipant,
    NotAuthorized,
    InvalidInput,
    ConfigError,
    ConcurrencyConflict,
    Cancelled,
    ExternalServiceFailure,
    GenericInternalServerError,
}

impl ErrorKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidTransition => "InvalidTransition",
            Self::NoRows => "NoRows",
            Self::FailedToConvertToApiType => "FailedToConvertToAPIType",
            Self::ThreadsLoadFailure => "ThreadsLoadFailure",
            Self::MessageCreateFailure => "MessageCreateFailure",
            Self::NotThreadParticipant => "NotThreadParticipant",
            Self::NotAuthorized => "NotAuthorized",
            Self::InvalidInput => "InvalidInput",
            Self::ConfigError => "ConfigError",
            Self::ConcurrencyConflict => "ConcurrencyConflict",
            Self::Cancelled => "Cancelled",
            Self::ExternalServiceFailure => "ExternalServiceFailure",
            Self::GenericInternalServerError => "GenericInternalServerError",
        }
    }
}

impl fmt::Display for ErrorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 系统错误类型
#[derive(Debug, Error)]
pub enum AppError {
    // ==================== 数据库错误 ====================
    #[error("数据库错误: {0}")]
    Database(sqlx::Error),

    #[error("记录未找到: {entity} id={id}")]
    NotFound { entity: &'static str, id: String },

    // ==================== 业务逻辑错误 ====================
    #[error("非法的状态迁移: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("并发冲突: {0}")]
    ConcurrencyConflict(String),

    #[error("操作已取消")]
    Cancelled,

    // ==================== 验证错误 ====================
    #[error("参数验证失败: {0}")]
    Validation(String),

    // ==================== 权限错误 ====================
    #[error("权限不足: {operation}")]
    Forbidden { operation: String },

    #[error("用户不在会话中: thread_id={thread_id}, user_id={user_id}")]
    NotThreadParticipant { thread_id: i64, user_id: i64 },

    // ==================== 配置错误 ====================
    #[error("配置错误: {0}")]
    Config(String),

    // ==================== 外部服务错误 ====================
    #[error("外部服务错误: {service} - {message}")]
    ExternalService { service: String, message: String },

    // ==================== 通用错误 ====================
    #[error("数据转换失败: {0}")]
    Conversion(String),

    #[error("内部错误: {0}")]
    Internal(String),

    /// 用更具体的键包装底层错误，类别沿用底层错误
    #[error("{key}: {source}")]
    Keyed {
        key: ErrorKey,
        #[source]
        source: Box<AppError>,
    },
}

/// 错误结果类型别名
pub type Result<T> = std::result::Result<T, AppError>;

impl AppError {
    pub fn not_found(entity: &'static str, id: impl fmt::Display) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn forbidden(operation: impl Into<String>) -> Self {
        Self::Forbidden {
            operation: operation.into(),
        }
    }

    /// 以指定键重新包装，保留原始错误作为 source
    pub fn with_key(self, key: ErrorKey) -> Self {
        Self::Keyed {
            key,
            source: Box::new(self),
        }
    }

    /// 错误类别
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Database(_) => ErrorCategory::Database,
            Self::NotFound { .. } => ErrorCategory::NotFound,
            Self::InvalidTransition { .. } | Self::Validation(_) | Self::Cancelled => {
                ErrorCategory::User
            }
            Self::Forbidden { .. } | Self::NotThreadParticipant { .. } => ErrorCategory::Forbidden,
            Self::ConcurrencyConflict(_)
            | Self::Config(_)
            | Self::ExternalService { .. }
            | Self::Conversion(_)
            | Self::Internal(_) => ErrorCategory::Internal,
            Self::Keyed { source, .. } => source.category(),
        }
    }

    /// 错误键
    pub fn key(&self) -> ErrorKey {
        match self {
            Self::Database(_) | Self::Internal(_) => ErrorKey::GenericInternalServerError,
            Self::NotFound { .. } => ErrorKey::NoRows,
            Self::InvalidTransition { .. } => ErrorKey::InvalidTransition,
            Self::ConcurrencyConflict(_) => ErrorKey::ConcurrencyConflict,
            Self::Cancelled => ErrorKey::Cancelled,
            Self::Validation(_) => ErrorKey::InvalidInput,
            Self::Forbidden { .. } => ErrorKey::NotAuthorized,
            Self::NotThreadParticipant { .. } => ErrorKey::NotThreadParticipant,
            Self::Config(_) => ErrorKey::ConfigError,
            Self::ExternalService { .. } => ErrorKey::ExternalServiceFailure,
            Self::Conversion(_) => ErrorKey::FailedToConvertToApiType,
            Self::Keyed { key, .. } => *key,
        }
    }

    /// 是否为可重试错误
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Database(_) | Self::ExternalService { .. } | Self::ConcurrencyConflict(_) => true,
            Self::Keyed { source, .. } => source.is_retryable(),
            _ => false,
        }
    }

    /// 对外暴露的错误视图
    ///
    /// User / Forbidden / NotFound 原样返回；数据库和内部错误统一为通用内部错误，
    /// 细节只进日志。
    pub fn to_client(&self) -> ClientError {
        match self.category() {
            ErrorCategory::User | ErrorCategory::Forbidden | ErrorCategory::NotFound => {
                ClientError {
                    key: self.key(),
                    category: self.category(),
                    message: self.to_string(),
                }
            }
            ErrorCategory::Database | ErrorCategory::Internal => ClientError {
                key: ErrorKey::GenericInternalServerError,
                category: ErrorCategory::Internal,
                message: "服务内部错误，请稍后重试".to_string(),
            },
        }
    }
}

/// 单条记录查询的「无数据」统一映射为 NoRows，与驱动无关
impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Self::NotFound {
                entity: "record",
                id: String::new(),
            },
            other => Self::Database(other),
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Conversion(err.to_string())
    }
}

/// 返回给 API 调用方的错误
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClientError {
    pub key: ErrorKey,
    pub category: ErrorCategory,
    pub message: String,
}
