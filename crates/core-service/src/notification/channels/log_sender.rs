//! 只记录日志的发送器

use async_trait::async_trait;
use tracing::info;
use uuid::Uuid;

use crate::error::Result;
use crate::models::Channel;
use crate::notification::sender::{MessageSender, OutboundMessage, SendResult};

pub struct LogSender {
    channel: Channel,
    name: String,
}

impl LogSender {
    pub fn new(channel: Channel) -> Self {
        Self {
            channel,
            name: format!("log-{channel}"),
        }
    }
}

#[async_trait]
impl MessageSender for LogSender {
    fn channel(&self) -> Channel {
        self.channel
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, message: &OutboundMessage) -> Result<SendResult> {
        let message_id = Uuid::now_v7().to_string();

        info!(
            channel = %self.channel,
            to = %message.to,
            subject = %message.subject,
            message_id = %message_id,
            "未配置发送服务，仅记录通知"
        );

        Ok(SendResult {
            channel: self.channel,
            message_id: Some(message_id),
        })
    }
}
