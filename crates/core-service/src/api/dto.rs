//! 请求和响应 DTO
//!
//! 字段统一使用 snake_case，与领域模型的 JSON 表示保持一致。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;
use wecarry_auth::Session;

use crate::models::{
    ContactPreference, NewRequest, NewUser, RequestKind, RequestSize, RequestStatus,
    RequestVisibility, ThreadId, UserId,
};

/// 统一响应包装
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub code: String,
    pub message: String,
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            code: "SUCCESS".to_string(),
            message: "操作成功".to_string(),
            data: Some(data),
        }
    }
}

/// 创建用户请求
#[derive(Debug, Deserialize, Validate)]
pub struct CreateUserRequest {
    #[validate(email(message = "邮箱格式无效"))]
    pub email: String,
    #[validate(length(min = 1, max = 50, message = "昵称长度必须在1-50个字符之间"))]
    pub nickname: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[validate(length(min = 5, max = 20, message = "手机号长度必须在5-20个字符之间"))]
    pub phone_number: Option<String>,
    #[serde(default)]
    pub contact_preference: ContactPreference,
    #[validate(length(max = 16, message = "语言标识过长"))]
    pub locale: Option<String>,
}

impl CreateUserRequest {
    pub fn into_new_user(self, default_locale: &str) -> NewUser {
        NewUser {
            email: self.email,
            nickname: self.nickname,
            first_name: self.first_name,
            last_name: self.last_name,
            phone_number: self.phone_number,
            contact_preference: self.contact_preference,
            locale: self
                .locale
                .filter(|l| !l.trim().is_empty())
                .unwrap_or_else(|| default_locale.to_string()),
        }
    }
}

/// 发布请求
#[derive(Debug, Deserialize, Validate)]
pub struct CreateRequestRequest {
    #[validate(length(min = 1, max = 255, message = "标题长度必须在1-255个字符之间"))]
    pub title: String,
    #[serde(default)]
    #[validate(length(max = 4096, message = "描述不能超过4096个字符"))]
    pub description: String,
    #[serde(default)]
    pub origin: String,
    #[validate(length(min = 1, max = 255, message = "目的地长度必须在1-255个字符之间"))]
    pub destination: String,
    #[serde(default)]
    pub size: RequestSize,
    #[serde(default)]
    pub kind: RequestKind,
    #[serde(default)]
    pub visibility: RequestVisibility,
    pub needed_after: Option<DateTime<Utc>>,
    pub needed_before: Option<DateTime<Utc>>,
}

impl CreateRequestRequest {
    pub fn into_new_request(self, creator_id: UserId) -> NewRequest {
        NewRequest {
            creator_id,
            title: self.title,
            description: self.description,
            origin: self.origin,
            destination: self.destination,
            size: self.size,
            kind: self.kind,
            visibility: self.visibility,
            needed_after: self.needed_after,
            needed_before: self.needed_before,
        }
    }
}

/// 状态迁移请求，如 `{ "status": "committed" }`
#[derive(Debug, Deserialize)]
pub struct TransitionRequest {
    pub status: RequestStatus,
}

/// 发送消息请求
#[derive(Debug, Deserialize, Validate)]
pub struct SendMessageRequest {
    #[validate(length(min = 1, message = "消息内容不能为空"))]
    pub content: String,
}

/// 拉人入会话请求
#[derive(Debug, Deserialize)]
pub struct AddParticipantRequest {
    pub user_id: UserId,
}

/// 登录跳转参数
#[derive(Debug, Deserialize, Validate)]
pub struct LoginQuery {
    #[validate(length(min = 1, max = 512, message = "state 长度必须在1-512个字符之间"))]
    pub state: String,
}

/// 登录跳转响应
#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub auth_url: String,
    /// 序列化后的会话，回调时原样带回
    pub session: String,
}

impl From<Session> for LoginResponse {
    fn from(session: Session) -> Self {
        Self {
            auth_url: session.auth_url.clone(),
            session: session.marshal(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct UnreadCountDto {
    pub thread_id: ThreadId,
    pub unread_count: i64,
}
