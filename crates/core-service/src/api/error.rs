//! API 错误响应
//!
//! 核心错误按类别映射为 HTTP 状态码：User → 400，Forbidden → 403，NotFound → 404，
//! Database / Internal → 500。响应体统一为 `{ success, code, message, data }`，
//! code 为稳定错误键。

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use wecarry_auth::AuthError;
use wecarry_shared::reporting::ErrorReport;

use crate::error::{AppError, ErrorCategory};

/// API 层错误
#[derive(Debug)]
pub struct ApiError(pub AppError);

pub type ApiResult<T> = std::result::Result<T, ApiError>;

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self.0.category() {
            ErrorCategory::User => StatusCode::BAD_REQUEST,
            ErrorCategory::Forbidden => StatusCode::FORBIDDEN,
            ErrorCategory::NotFound => StatusCode::NOT_FOUND,
            ErrorCategory::Database | ErrorCategory::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        Self(err)
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(errors: validator::ValidationErrors) -> Self {
        Self(AppError::Validation(errors.to_string()))
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        let mapped = match err {
            AuthError::UnknownProvider(name) => AppError::not_found("provider", name),
            AuthError::Config(msg) => AppError::Config(msg),
            invalid @ (AuthError::InvalidSession(_) | AuthError::MissingAuthUrl) => {
                AppError::Validation(invalid.to_string())
            }
            other => AppError::ExternalService {
                service: "identity-provider".to_string(),
                message: other.to_string(),
            },
        };
        Self(mapped)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let client = self.0.to_client();

        // 系统级错误只返回通用提示，详细信息记录日志并交给上报中间件
        let server_side = matches!(
            self.0.category(),
            ErrorCategory::Database | ErrorCategory::Internal
        );
        if server_side {
            tracing::error!(error = %self.0, key = %self.0.key(), "请求处理失败");
        }

        let body = json!({
            "success": false,
            "code": client.key,
            "message": client.message,
            "data": serde_json::Value::Null
        });

        let mut response = (status, axum::Json(body)).into_response();
        if server_side {
            response
                .extensions_mut()
                .insert(ErrorReport::from_error(&self.0, String::new()));
        }
        response
    }
}
