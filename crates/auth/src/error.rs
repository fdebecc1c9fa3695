//! 认证错误类型

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("身份提供方配置无效: {0}")]
    Config(String),

    #[error("未知的身份提供方: {0}")]
    UnknownProvider(String),

    #[error("会话数据无效: {0}")]
    InvalidSession(#[from] serde_json::Error),

    #[error("会话中没有授权地址")]
    MissingAuthUrl,

    #[error("会话中没有 access token，无法获取用户信息")]
    MissingAccessToken,

    #[error("请求身份提供方失败: {0}")]
    Http(#[from] reqwest::Error),

    #[error("身份提供方返回异常状态: {status} {body}")]
    UnexpectedStatus { status: u16, body: String },
}

impl AuthError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Config(_) => "AUTH_CONFIG_ERROR",
            Self::UnknownProvider(_) => "UNKNOWN_PROVIDER",
            Self::InvalidSession(_) => "INVALID_SESSION",
            Self::MissingAuthUrl => "MISSING_AUTH_URL",
            Self::MissingAccessToken => "MISSING_ACCESS_TOKEN",
            Self::Http(_) => "PROVIDER_HTTP_ERROR",
            Self::UnexpectedStatus { .. } => "PROVIDER_UNEXPECTED_STATUS",
        }
    }

    /// 网络类错误可重试，配置和会话错误不可重试
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(_) => true,
            Self::UnexpectedStatus { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, AuthError>;
