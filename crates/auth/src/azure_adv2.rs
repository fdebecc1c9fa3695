//! Azure AD v2 身份提供方
//!
//! 配置来自 JSON 文档：`{"TenantID": "...", "ClientSecret": "...", "ApplicationID": "..."}`。
//! 用户信息通过 Microsoft Graph `/me` 获取。

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, instrument};

use crate::error::{AuthError, Result};
use crate::provider::{AuthUser, Provider};
use crate::session::Session;

pub const PROVIDER_NAME: &str = "azureadv2";

const AUTHORITY: &str = "https://login.microsoftonline.com";
const GRAPH_ME_URL: &str = "https://graph.microsoft.com/v1.0/me";

/// 默认申请的 scope
pub const DEFAULT_SCOPES: [&str; 3] = ["openid", "profile", "email"];

/// Azure AD v2 配置
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AzureAdV2Config {
    #[serde(rename = "TenantID")]
    pub tenant_id: String,
    #[serde(rename = "ClientSecret")]
    pub client_secret: String,
    #[serde(rename = "ApplicationID")]
    pub application_id: String,
}

impl AzureAdV2Config {
    /// 解析并校验 JSON 配置
    pub fn from_json(data: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(data)
            .map_err(|e| AuthError::Config(format!("Azure AD 配置解析失败: {e}")))?;

        if config.tenant_id.trim().is_empty() {
            return Err(AuthError::Config("TenantID 不能为空".to_string()));
        }
        if config.application_id.trim().is_empty() {
            return Err(AuthError::Config("ApplicationID 不能为空".to_string()));
        }

        Ok(config)
    }
}

pub struct AzureAdV2Provider {
    config: AzureAdV2Config,
    callback_url: String,
    scopes: Vec<String>,
    graph_me_url: String,
    client: reqwest::Client,
}

impl AzureAdV2Provider {
    pub fn new(config: AzureAdV2Config, callback_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            config,
            callback_url: callback_url.into(),
            scopes: DEFAULT_SCOPES.iter().map(|s| s.to_string()).collect(),
            graph_me_url: GRAPH_ME_URL.to_string(),
            client,
        })
    }

    pub fn from_json(data: &str, callback_url: impl Into<String>) -> Result<Self> {
        Self::new(AzureAdV2Config::from_json(data)?, callback_url)
    }

    /// 追加 scope，重复项忽略
    pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for scope in scopes {
            let scope = scope.into();
            if !self.scopes.contains(&scope) {
                self.scopes.push(scope);
            }
        }
        self
    }

    /// 覆盖 Graph `/me` 地址（测试用）
    pub fn with_graph_me_url(mut self, url: impl Into<String>) -> Self {
        self.graph_me_url = url.into();
        self
    }

    pub fn authorize_endpoint(&self) -> String {
        format!("{}/{}/oauth2/v2.0/authorize", AUTHORITY, self.config.tenant_id)
    }

    pub fn token_endpoint(&self) -> String {
        format!("{}/{}/oauth2/v2.0/token", AUTHORITY, self.config.tenant_id)
    }
}

fn str_field(raw: &Map<String, Value>, key: &str) -> String {
    raw.get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

#[async_trait]
impl Provider for AzureAdV2Provider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    fn begin_auth(&self, state: &str) -> Result<Session> {
        let mut url = reqwest::Url::parse(&self.authorize_endpoint())
            .map_err(|e| AuthError::Config(format!("授权地址无效: {e}")))?;

        url.query_pairs_mut()
            .append_pair("client_id", &self.config.application_id)
            .append_pair("redirect_uri", &self.callback_url)
            .append_pair("response_type", "code")
            .append_pair("response_mode", "query")
            .append_pair("scope", &self.scopes.join(" "))
            .append_pair("state", state);

        Ok(Session::new(url.to_string()))
    }

    #[instrument(skip(self, session), fields(provider = PROVIDER_NAME))]
    async fn fetch_user(&self, session: &Session) -> Result<AuthUser> {
        if session.access_token.is_empty() {
            return Err(AuthError::MissingAccessToken);
        }

        let resp = self
            .client
            .get(&self.graph_me_url)
            .bearer_auth(&session.access_token)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(AuthError::UnexpectedStatus {
                status: status.as_u16(),
                body,
            });
        }

        let raw: Map<String, Value> = resp.json().await?;
        debug!(fields = raw.len(), "已获取 Graph 用户信息");

        // 部分租户账号没有 mail 字段，退回 userPrincipalName
        let mut email = str_field(&raw, "mail");
        if email.is_empty() {
            email = str_field(&raw, "userPrincipalName");
        }

        Ok(AuthUser {
            provider: PROVIDER_NAME.to_string(),
            user_id: str_field(&raw, "id"),
            email,
            name: str_field(&raw, "displayName"),
            first_name: str_field(&raw, "givenName"),
            last_name: str_field(&raw, "surname"),
            nickname: str_field(&raw, "displayName"),
            access_token: session.access_token.clone(),
            raw_data: raw,
        })
    }
}
