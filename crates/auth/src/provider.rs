//! 身份提供方接口

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::session::Session;

/// 从身份提供方取回的用户信息
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AuthUser {
    /// 提供方名称，如 azureadv2
    pub provider: String,
    /// 提供方侧的用户 ID
    pub user_id: String,
    pub email: String,
    pub name: String,
    pub first_name: String,
    pub last_name: String,
    pub nickname: String,
    pub access_token: String,
    /// 提供方返回的原始字段
    pub raw_data: serde_json::Map<String, serde_json::Value>,
}

/// OAuth2/OIDC 身份提供方
#[async_trait]
pub trait Provider: Send + Sync {
    /// 提供方名称，同时作为登录路由中的标识
    fn name(&self) -> &str;

    /// 生成带 state 的授权地址，放入新会话
    fn begin_auth(&self, state: &str) -> Result<Session>;

    /// 恢复之前序列化的会话
    fn unmarshal_session(&self, data: &str) -> Result<Session> {
        Session::unmarshal(data)
    }

    /// 使用会话中的 access token 获取用户信息
    async fn fetch_user(&self, session: &Session) -> Result<AuthUser>;
}
