//! SendGrid 邮件渠道

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, instrument};
use wecarry_shared::config::EmailConfig;

use super::http_failure;
use crate::error::{AppError, Result};
use crate::models::Channel;
use crate::notification::sender::{MessageSender, OutboundMessage, SendResult};

const SENDGRID_ENDPOINT: &str = "https://api.sendgrid.com/v3/mail/send";

pub struct SendGridEmailSender {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    from_name: String,
}

impl SendGridEmailSender {
    pub fn new(config: &EmailConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| AppError::Config(format!("HTTP 客户端创建失败: {e}")))?;

        Ok(Self {
            client,
            endpoint: SENDGRID_ENDPOINT.to_string(),
            api_key: config.sendgrid_api_key.clone(),
            from_name: config.from_name.clone(),
        })
    }

    /// 覆盖 API 地址（测试用）
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

#[async_trait]
impl MessageSender for SendGridEmailSender {
    fn channel(&self) -> Channel {
        Channel::Email
    }

    fn name(&self) -> &str {
        "sendgrid"
    }

    #[instrument(skip(self, message), fields(to = %message.to))]
    async fn send(&self, message: &OutboundMessage) -> Result<SendResult> {
        let payload = json!({
            "personalizations": [{ "to": [{ "email": message.to }] }],
            "from": { "email": message.from, "name": self.from_name },
            "subject": message.subject,
            "content": [{ "type": "text/plain", "value": message.body }],
        });

        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| AppError::ExternalService {
                service: "sendgrid".to_string(),
                message: e.to_string(),
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(http_failure("sendgrid", status, body));
        }

        let message_id = resp
            .headers()
            .get("x-message-id")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        debug!(?message_id, "邮件已提交 SendGrid");

        Ok(SendResult {
            channel: Channel::Email,
            message_id,
        })
    }
}
