//! 通知渠道实现
//!
//! - **Email**: SendGrid，未配置 API key 时退化为日志发送
//! - **Mobile**: HTTP 短信/推送网关，未配置网关时退化为日志发送
//! - **Dummy**: 只计数和记录，测试用

mod dummy;
mod email;
mod log_sender;
mod mobile;

pub use dummy::DummySender;
pub use email::SendGridEmailSender;
pub use log_sender::LogSender;
pub use mobile::WebhookMobileSender;

use std::sync::Arc;

use wecarry_shared::config::{EmailConfig, MobileConfig};

use super::sender::{MessageSender, Senders};
use crate::error::{AppError, Result};
use crate::models::Channel;

/// HTTP 失败响应转错误：限流和 5xx 可重试，其余 4xx 视为永久失败
pub(crate) fn http_failure(service: &str, status: reqwest::StatusCode, body: String) -> AppError {
    if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        AppError::ExternalService {
            service: service.to_string(),
            message: format!("HTTP {status}: {body}"),
        }
    } else {
        AppError::Validation(format!("{service} 拒绝请求 HTTP {status}: {body}"))
    }
}

/// 根据配置构建邮件与移动端发送器
pub fn build_senders(email: &EmailConfig, mobile: &MobileConfig) -> Result<Senders> {
    let email_sender: Arc<dyn MessageSender> = if email.sendgrid_api_key.is_empty() {
        Arc::new(LogSender::new(Channel::Email))
    } else {
        Arc::new(SendGridEmailSender::new(email)?)
    };

    let mobile_sender: Arc<dyn MessageSender> = if mobile.gateway_url.is_empty() {
        Arc::new(LogSender::new(Channel::Mobile))
    } else {
        Arc::new(WebhookMobileSender::new(mobile)?)
    };

    Ok(Senders::new().with(email_sender).with(mobile_sender))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unconfigured_senders_fall_back_to_log() {
        let senders = build_senders(&EmailConfig::default(), &MobileConfig::default()).unwrap();
        assert_eq!(senders.get(Channel::Email).unwrap().name(), "log-email");
        assert_eq!(senders.get(Channel::Mobile).unwrap().name(), "log-mobile");
    }

    #[test]
    fn test_configured_senders() {
        let email = EmailConfig {
            sendgrid_api_key: "SG.key".into(),
            ..Default::default()
        };
        let mobile = MobileConfig {
            gateway_url: "http://localhost:9/send".into(),
            api_key: "k".into(),
            from: "WeCarry".into(),
        };
        let senders = build_senders(&email, &mobile).unwrap();
        assert_eq!(senders.get(Channel::Email).unwrap().name(), "sendgrid");
        assert_eq!(senders.get(Channel::Mobile).unwrap().name(), "mobile-gateway");
    }
}
