//! 消息发送抽象
//!
//! 邮件和移动端共用 `MessageSender` trait，按渠道注册到 `Senders`。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::{AppError, Result};
use crate::models::Channel;

/// 已渲染的待发送消息
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutboundMessage {
    pub to: String,
    pub from: String,
    pub subject: String,
    pub body: String,
}

/// 发送结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendResult {
    pub channel: Channel,
    /// 外部服务返回的消息标识，用于追踪投递状态
    pub message_id: Option<String>,
}

/// 消息发送器
///
/// 失败返回 `AppError::ExternalService`（可重试）或 `AppError::Validation`（永久失败）。
#[async_trait]
pub trait MessageSender: Send + Sync {
    fn channel(&self) -> Channel;

    /// 发送器名称（用于日志）
    fn name(&self) -> &str;

    async fn send(&self, message: &OutboundMessage) -> Result<SendResult>;
}

/// 按渠道索引的发送器集合
#[derive(Clone, Default)]
pub struct Senders {
    senders: HashMap<Channel, Arc<dyn MessageSender>>,
}

impl Senders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sender: Arc<dyn MessageSender>) -> Self {
        self.register(sender);
        self
    }

    /// 注册发送器，同渠道覆盖
    pub fn register(&mut self, sender: Arc<dyn MessageSender>) {
        self.senders.insert(sender.channel(), sender);
    }

    pub fn get(&self, channel: Channel) -> Result<Arc<dyn MessageSender>> {
        self.senders
            .get(&channel)
            .cloned()
            .ok_or_else(|| AppError::Config(format!("渠道 {channel} 未配置发送器")))
    }
}
