//! 测试用发送器

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::{AppError, Result};
use crate::models::Channel;
use crate::notification::sender::{MessageSender, OutboundMessage, SendResult};

/// 记录每次发送，可配置前 N 次失败
pub struct DummySender {
    channel: Channel,
    calls: AtomicUsize,
    failures_remaining: AtomicUsize,
    sent: Mutex<Vec<OutboundMessage>>,
}

impl DummySender {
    pub fn new(channel: Channel) -> Self {
        Self {
            channel,
            calls: AtomicUsize::new(0),
            failures_remaining: AtomicUsize::new(0),
            sent: Mutex::new(Vec::new()),
        }
    }

    /// 接下来的 n 次发送返回可重试的外部服务错误
    pub fn fail_next(&self, n: usize) {
        self.failures_remaining.store(n, Ordering::SeqCst);
    }

    /// 调用次数（含失败）
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// 成功发送的消息
    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl MessageSender for DummySender {
    fn channel(&self) -> Channel {
        self.channel
    }

    fn name(&self) -> &str {
        "dummy"
    }

    async fn send(&self, message: &OutboundMessage) -> Result<SendResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let failing = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(AppError::ExternalService {
                service: "dummy".to_string(),
                message: "模拟发送失败".to_string(),
            });
        }

        self.sent.lock().push(message.clone());
        Ok(SendResult {
            channel: self.channel,
            message_id: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message() -> OutboundMessage {
        OutboundMessage {
            to: "a@example.com".into(),
            from: "no_reply@wecarry.app".into(),
            subject: "s".into(),
            body: "b".into(),
        }
    }

    #[tokio::test]
    async fn test_counts_and_fails_on_demand() {
        let sender = DummySender::new(Channel::Email);
        sender.fail_next(1);

        assert!(sender.send(&message()).await.is_err());
        assert!(sender.send(&message()).await.is_ok());
        assert_eq!(sender.calls(), 2);
        assert_eq!(sender.sent(), vec![message()]);
    }
}
