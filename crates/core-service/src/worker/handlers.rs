//! 通知任务处理器
//!
//! 处理器执行时重新加载实体：引用的消息/请求/用户已不存在属于永久失败；
//! 收件人地址取最新值，缺少对应渠道的地址同样是永久失败。

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, instrument};
use wecarry_shared::observability::metrics;

use super::jobs::{Delivery, Job};
use super::{JobError, JobHandler};
use crate::error::ErrorKey;
use crate::models::Channel;
use crate::notification::sender::{OutboundMessage, Senders};
use crate::repository::{RequestRepositoryTrait, ThreadRepositoryTrait, UserRepositoryTrait};

/// 各渠道的发件人标识
#[derive(Debug, Clone, Default)]
pub struct SenderIdentity {
    pub email_from: String,
    pub mobile_from: String,
}

impl SenderIdentity {
    fn for_channel(&self, channel: Channel) -> &str {
        match channel {
            Channel::Email => &self.email_from,
            Channel::Mobile => &self.mobile_from,
        }
    }
}

/// 投递服务：加载收件人并通过对应渠道发送
pub struct DeliveryService {
    users: Arc<dyn UserRepositoryTrait>,
    senders: Senders,
    identity: SenderIdentity,
}

impl DeliveryService {
    pub fn new(
        users: Arc<dyn UserRepositoryTrait>,
        senders: Senders,
        identity: SenderIdentity,
    ) -> Self {
        Self {
            users,
            senders,
            identity,
        }
    }

    #[instrument(skip(self, delivery), fields(recipient_id = %delivery.recipient_id, channel = %delivery.channel, template = %delivery.template))]
    pub async fn deliver(&self, delivery: &Delivery) -> Result<(), JobError> {
        let recipient = self
            .users
            .get_user(delivery.recipient_id)
            .await?
            .ok_or_else(|| JobError::missing("user", delivery.recipient_id))?;

        let to = recipient.address_for(delivery.channel).ok_or_else(|| {
            JobError::permanent(
                ErrorKey::InvalidInput,
                format!(
                    "用户 {} 没有 {} 渠道的地址",
                    recipient.id, delivery.channel
                ),
            )
        })?;

        let sender = self.senders.get(delivery.channel)?;
        let message = OutboundMessage {
            to: to.to_string(),
            from: self.identity.for_channel(delivery.channel).to_string(),
            subject: delivery.subject.clone(),
            body: delivery.body.clone(),
        };

        match sender.send(&message).await {
            Ok(result) => {
                metrics::record_notification_send(delivery.channel.as_str(), "sent");
                debug!(sender = sender.name(), message_id = ?result.message_id, "通知已发送");
                Ok(())
            }
            Err(e) => {
                metrics::record_notification_send(delivery.channel.as_str(), "failed");
                Err(e.into())
            }
        }
    }
}

fn unexpected(job: &Job, expected: &str) -> JobError {
    JobError::permanent(
        ErrorKey::ConfigError,
        format!("处理器 {expected} 收到 {} 任务", job.name()),
    )
}

/// `new_message`：收件人仍是会话参与者时才发送
pub struct NewMessageHandler {
    threads: Arc<dyn ThreadRepositoryTrait>,
    delivery: Arc<DeliveryService>,
}

impl NewMessageHandler {
    pub fn new(threads: Arc<dyn ThreadRepositoryTrait>, delivery: Arc<DeliveryService>) -> Self {
        Self { threads, delivery }
    }
}

#[async_trait]
impl JobHandler for NewMessageHandler {
    async fn handle(&self, job: &Job) -> Result<(), JobError> {
        let Job::NewMessage {
            message_id,
            delivery,
        } = job
        else {
            return Err(unexpected(job, super::jobs::NEW_MESSAGE));
        };

        let message = self
            .threads
            .get_message(*message_id)
            .await?
            .ok_or_else(|| JobError::missing("message", message_id))?;

        let participants = self.threads.list_participants(message.thread_id).await?;
        if !participants
            .iter()
            .any(|p| p.user_id == delivery.recipient_id)
        {
            return Err(JobError::permanent(
                ErrorKey::NotThreadParticipant,
                format!(
                    "用户 {} 已不在会话 {} 中",
                    delivery.recipient_id, message.thread_id
                ),
            ));
        }

        self.delivery.deliver(delivery).await
    }
}

/// `request_status`：请求仍存在时发送
pub struct RequestStatusHandler {
    requests: Arc<dyn RequestRepositoryTrait>,
    delivery: Arc<DeliveryService>,
}

impl RequestStatusHandler {
    pub fn new(requests: Arc<dyn RequestRepositoryTrait>, delivery: Arc<DeliveryService>) -> Self {
        Self { requests, delivery }
    }
}

#[async_trait]
impl JobHandler for RequestStatusHandler {
    async fn handle(&self, job: &Job) -> Result<(), JobError> {
        let Job::RequestStatus {
            request_id,
            delivery,
        } = job
        else {
            return Err(unexpected(job, super::jobs::REQUEST_STATUS));
        };

        self.requests
            .get_request(*request_id)
            .await?
            .ok_or_else(|| JobError::missing("request", request_id))?;

        self.delivery.deliver(delivery).await
    }
}

/// `user_welcome`
pub struct UserWelcomeHandler {
    users: Arc<dyn UserRepositoryTrait>,
    delivery: Arc<DeliveryService>,
}

impl UserWelcomeHandler {
    pub fn new(users: Arc<dyn UserRepositoryTrait>, delivery: Arc<DeliveryService>) -> Self {
        Self { users, delivery }
    }
}

#[async_trait]
impl JobHandler for UserWelcomeHandler {
    async fn handle(&self, job: &Job) -> Result<(), JobError> {
        let Job::UserWelcome { user_id, delivery } = job else {
            return Err(unexpected(job, super::jobs::USER_WELCOME));
        };

        self.users
            .get_user(*user_id)
            .await?
            .ok_or_else(|| JobError::missing("user", user_id))?;

        self.delivery.deliver(delivery).await
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::models::{ContactPreference, MessageId, User, UserId};
    use crate::notification::channels::DummySender;
    use crate::notification::template::TemplateKey;
    use crate::repository::{MockThreadRepositoryTrait, MockUserRepositoryTrait};

    fn user(id: i64, phone: Option<&str>) -> User {
        User {
            id: UserId(id),
            email: format!("user{id}@example.com"),
            nickname: format!("user{id}"),
            first_name: String::new(),
            last_name: String::new(),
            phone_number: phone.map(str::to_string),
            contact_preference: ContactPreference::Both,
            locale: "en".into(),
            created_at: Utc::now(),
        }
    }

    fn delivery(channel: Channel) -> Delivery {
        Delivery {
            recipient_id: UserId(2),
            template: TemplateKey::NewMessage,
            channel,
            subject: "New message".into(),
            body: "hello".into(),
        }
    }

    fn service(users: MockUserRepositoryTrait) -> (DeliveryService, Arc<DummySender>, Arc<DummySender>) {
        let email = Arc::new(DummySender::new(Channel::Email));
        let mobile = Arc::new(DummySender::new(Channel::Mobile));
        let senders = Senders::new().with(email.clone()).with(mobile.clone());
        let identity = SenderIdentity {
            email_from: "no_reply@wecarry.app".into(),
            mobile_from: "WeCarry".into(),
        };
        (DeliveryService::new(Arc::new(users), senders, identity), email, mobile)
    }

    #[tokio::test]
    async fn test_deliver_uses_fresh_address() {
        let mut users = MockUserRepositoryTrait::new();
        users
            .expect_get_user()
            .returning(|id| Ok(Some(user(id.value(), Some("+15550100")))));
        let (service, email, mobile) = service(users);

        service.deliver(&delivery(Channel::Email)).await.unwrap();
        service.deliver(&delivery(Channel::Mobile)).await.unwrap();

        assert_eq!(email.sent()[0].to, "user2@example.com");
        assert_eq!(email.sent()[0].from, "no_reply@wecarry.app");
        assert_eq!(mobile.sent()[0].to, "+15550100");
    }

    #[tokio::test]
    async fn test_missing_phone_is_permanent() {
        let mut users = MockUserRepositoryTrait::new();
        users
            .expect_get_user()
            .returning(|id| Ok(Some(user(id.value(), None))));
        let (service, _, mobile) = service(users);

        let err = service.deliver(&delivery(Channel::Mobile)).await.unwrap_err();
        assert!(!err.is_retryable());
        assert_eq!(mobile.calls(), 0);
    }

    #[tokio::test]
    async fn test_sender_failure_is_retryable() {
        let mut users = MockUserRepositoryTrait::new();
        users
            .expect_get_user()
            .returning(|id| Ok(Some(user(id.value(), None))));
        let (service, email, _) = service(users);
        email.fail_next(1);

        let err = service.deliver(&delivery(Channel::Email)).await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_new_message_with_unknown_id_is_permanent() {
        let mut threads = MockThreadRepositoryTrait::new();
        threads.expect_get_message().returning(|_| Ok(None));
        threads.expect_list_participants().never();
        let (service, email, _) = service(MockUserRepositoryTrait::new());

        let handler = NewMessageHandler::new(Arc::new(threads), Arc::new(service));
        let err = handler
            .handle(&Job::NewMessage {
                message_id: MessageId(12345),
                delivery: delivery(Channel::Email),
            })
            .await
            .unwrap_err();

        assert!(matches!(err, JobError::Permanent(ref f) if f.key == ErrorKey::NoRows));
        assert_eq!(email.calls(), 0);
    }

    #[tokio::test]
    async fn test_wrong_variant_is_permanent() {
        let (service, _, _) = service(MockUserRepositoryTrait::new());
        let handler = UserWelcomeHandler::new(
            Arc::new(MockUserRepositoryTrait::new()),
            Arc::new(service),
        );

        let err = handler
            .handle(&Job::NewMessage {
                message_id: MessageId(1),
                delivery: delivery(Channel::Email),
            })
            .await
            .unwrap_err();
        assert!(!err.is_retryable());
    }
}
