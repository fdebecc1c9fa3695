//! 移动端（短信/推送）网关渠道
//!
//! 以 JSON 形式 POST 到配置的网关地址：`{"to", "from", "subject", "body"}`。

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, instrument};
use wecarry_shared::config::MobileConfig;

use super::http_failure;
use crate::error::{AppError, Result};
use crate::models::Channel;
use crate::notification::sender::{MessageSender, OutboundMessage, SendResult};

#[derive(Debug, Default, Deserialize)]
struct GatewayResponse {
    #[serde(default)]
    id: Option<String>,
}

pub struct WebhookMobileSender {
    client: reqwest::Client,
    gateway_url: String,
    api_key: String,
    from: String,
}

impl WebhookMobileSender {
    pub fn new(config: &MobileConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| AppError::Config(format!("HTTP 客户端创建失败: {e}")))?;

        Ok(Self {
            client,
            gateway_url: config.gateway_url.clone(),
            api_key: config.api_key.clone(),
            from: config.from.clone(),
        })
    }
}

#[async_trait]
impl MessageSender for WebhookMobileSender {
    fn channel(&self) -> Channel {
        Channel::Mobile
    }

    fn name(&self) -> &str {
        "mobile-gateway"
    }

    #[instrument(skip(self, message), fields(to = %message.to))]
    async fn send(&self, message: &OutboundMessage) -> Result<SendResult> {
        // 网关配置了固定发件人时以网关为准
        let from = if self.from.is_empty() {
            message.from.as_str()
        } else {
            self.from.as_str()
        };

        let mut request = self.client.post(&self.gateway_url).json(&OutboundMessage {
            from: from.to_string(),
            ..message.clone()
        });
        if !self.api_key.is_empty() {
            request = request.bearer_auth(&self.api_key);
        }

        let resp = request.send().await.map_err(|e| AppError::ExternalService {
            service: "mobile-gateway".to_string(),
            message: e.to_string(),
        })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(http_failure("mobile-gateway", status, body));
        }

        // 网关不一定返回 JSON
        let parsed: GatewayResponse = resp.json().await.unwrap_or_default();
        debug!(message_id = ?parsed.id, "移动端消息已提交网关");

        Ok(SendResult {
            channel: Channel::Mobile,
            message_id: parsed.id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_send_posts_message_to_gateway() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("authorization", "Bearer gw-key"))
            .and(body_json(serde_json::json!({
                "to": "+15550100",
                "from": "WeCarry",
                "subject": "Hi",
                "body": "Your request was delivered"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": "m-1"})))
            .expect(1)
            .mount(&server)
            .await;

        let sender = WebhookMobileSender::new(&MobileConfig {
            gateway_url: format!("{}/send", server.uri()),
            api_key: "gw-key".into(),
            from: "WeCarry".into(),
        })
        .unwrap();

        let result = sender
            .send(&OutboundMessage {
                to: "+15550100".into(),
                from: "ignored".into(),
                subject: "Hi".into(),
                body: "Your request was delivered".into(),
            })
            .await
            .unwrap();
        assert_eq!(result.message_id.as_deref(), Some("m-1"));
    }
}
