//! 通知调度器
//!
//! 订阅领域事件，按事件重新加载实体、计算收件人、按收件人语言渲染模板，
//! 再按收件人的联系偏好为每个渠道投递一个 Worker 任务。
//! 同一批事件内 (收件人, 模板, 请求) 相同的通知只投递一次。

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, instrument, warn};
use wecarry_shared::observability::metrics;

use super::template::{TemplateContext, TemplateKey, TemplateRegistry};
use crate::error::{AppError, Result};
use crate::events::{DomainEvent, EventListener, StatusChanged};
use crate::lifecycle::transitions::{Party, Role, notice_for, notice_templates};
use crate::models::{MessageId, Request, RequestId, ThreadId, User, UserId};
use crate::repository::{RequestRepositoryTrait, ThreadRepositoryTrait, UserRepositoryTrait};
use crate::worker::{Delivery, Job, JobQueue};

/// 任务引用的实体
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Subject {
    Message(MessageId),
    Request(RequestId),
    User(UserId),
}

/// 一条待投递的通知
struct PlannedNotice {
    recipient: User,
    template: TemplateKey,
    request_id: Option<RequestId>,
    subject: Subject,
    context: TemplateContext,
}

impl PlannedNotice {
    fn dedup_key(&self) -> (UserId, TemplateKey, Option<RequestId>) {
        (self.recipient.id, self.template, self.request_id)
    }
}

pub struct Dispatcher {
    users: Arc<dyn UserRepositoryTrait>,
    requests: Arc<dyn RequestRepositoryTrait>,
    threads: Arc<dyn ThreadRepositoryTrait>,
    templates: Arc<TemplateRegistry>,
    queue: Arc<dyn JobQueue>,
    ui_url: String,
}

impl Dispatcher {
    /// 调度器可能用到的全部模板
    pub fn required_templates() -> Vec<TemplateKey> {
        let mut keys = vec![
            TemplateKey::NewMessage,
            TemplateKey::NewRequest,
            TemplateKey::NewUserWelcome,
        ];
        keys.extend(notice_templates());
        keys
    }

    /// 创建调度器，缺少任何需要的默认语言模板时返回配置错误
    pub fn new(
        users: Arc<dyn UserRepositoryTrait>,
        requests: Arc<dyn RequestRepositoryTrait>,
        threads: Arc<dyn ThreadRepositoryTrait>,
        templates: Arc<TemplateRegistry>,
        queue: Arc<dyn JobQueue>,
        ui_url: impl Into<String>,
    ) -> Result<Self> {
        templates.ensure_registered(&Self::required_templates())?;

        Ok(Self {
            users,
            requests,
            threads,
            templates,
            queue,
            ui_url: ui_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// 处理一批事件，返回投递的任务数
    ///
    /// 单个事件处理失败只记录日志，不影响同批其他事件。
    /// 去重只在同一批内生效：目前每次提交只发出一个事件（`EventBus::emit`），
    /// 多事件批次来自 `EventBus::emit_all`。
    pub async fn dispatch(&self, events: &[DomainEvent]) -> usize {
        let mut seen = HashSet::new();
        let mut enqueued = 0;

        for event in events {
            let planned = match self.plan(event).await {
                Ok(planned) => planned,
                Err(e) => {
                    error!(event = %event.kind(), error = %e, "通知计算失败，跳过该事件");
                    continue;
                }
            };

            for notice in planned {
                if !seen.insert(notice.dedup_key()) {
                    debug!(
                        recipient_id = %notice.recipient.id,
                        template = %notice.template,
                        "同批次重复通知，已去重"
                    );
                    continue;
                }
                enqueued += self.enqueue(notice);
            }
        }

        enqueued
    }

    async fn plan(&self, event: &DomainEvent) -> Result<Vec<PlannedNotice>> {
        match event {
            DomainEvent::UserCreated { user_id } => self.plan_welcome(*user_id).await,
            DomainEvent::RequestCreated { request_id, .. } => {
                self.plan_request_created(*request_id).await
            }
            DomainEvent::RequestStatusChanged(change) => self.plan_status_change(change).await,
            DomainEvent::MessageAdded {
                thread_id,
                message_id,
                sender_id,
            } => {
                self.plan_message(*thread_id, *message_id, *sender_id)
                    .await
            }
        }
    }

    async fn plan_welcome(&self, user_id: UserId) -> Result<Vec<PlannedNotice>> {
        let user = self.load_user(user_id).await?;
        let context = self.base_context(&user);

        Ok(vec![PlannedNotice {
            recipient: user,
            template: TemplateKey::NewUserWelcome,
            request_id: None,
            subject: Subject::User(user_id),
            context,
        }])
    }

    async fn plan_request_created(&self, request_id: RequestId) -> Result<Vec<PlannedNotice>> {
        let request = self.load_request(request_id).await?;
        let creator = self.load_user(request.creator_id).await?;

        let mut context = self.base_context(&creator);
        self.add_request_fields(&mut context, &request);
        context.set("creator_nickname", creator.nickname.clone());

        Ok(vec![PlannedNotice {
            recipient: creator,
            template: TemplateKey::NewRequest,
            request_id: Some(request_id),
            subject: Subject::Request(request_id),
            context,
        }])
    }

    #[instrument(skip(self, change), fields(request_id = %change.request_id, from = %change.old_status, to = %change.new_status))]
    async fn plan_status_change(&self, change: &StatusChanged) -> Result<Vec<PlannedNotice>> {
        let request = self.load_request(change.request_id).await?;
        let role = Role::resolve(request.creator_id, change.provider_id, change.actor_id);

        let Some(notice) = notice_for(change.old_status, change.new_status, role) else {
            debug!("该迁移没有对应通知");
            return Ok(Vec::new());
        };

        let recipient_id = match notice.recipient {
            Party::Creator => request.creator_id,
            Party::Provider => match change.provider_id {
                Some(id) => id,
                None => {
                    debug!("请求没有承接者，跳过通知");
                    return Ok(Vec::new());
                }
            },
        };

        let recipient = self.load_user(recipient_id).await?;
        let creator = self.load_user(request.creator_id).await?;
        let actor = self.load_user(change.actor_id).await?;

        let mut context = self.base_context(&recipient);
        self.add_request_fields(&mut context, &request);
        context.set("creator_nickname", creator.nickname.clone());
        context.set("actor_nickname", actor.nickname.clone());
        if let Some(provider_id) = change.provider_id {
            let provider = self.load_user(provider_id).await?;
            context.set("provider_nickname", provider.nickname);
        }

        Ok(vec![PlannedNotice {
            recipient,
            template: notice.template,
            request_id: Some(request.id),
            subject: Subject::Request(request.id),
            context,
        }])
    }

    #[instrument(skip(self))]
    async fn plan_message(
        &self,
        thread_id: ThreadId,
        message_id: MessageId,
        sender_id: UserId,
    ) -> Result<Vec<PlannedNotice>> {
        let message = self
            .threads
            .get_message(message_id)
            .await?
            .ok_or_else(|| AppError::not_found("message", message_id))?;
        let thread = self
            .threads
            .get_thread(thread_id)
            .await?
            .ok_or_else(|| AppError::not_found("thread", thread_id))?;
        let request = self.load_request(thread.request_id).await?;
        let sender = self.load_user(sender_id).await?;
        let participants = self.threads.list_participants(thread_id).await?;

        let mut planned = Vec::with_capacity(participants.len());
        for participant in participants {
            if participant.user_id == sender_id {
                continue;
            }
            let recipient = match self.load_user(participant.user_id).await {
                Ok(user) => user,
                Err(e) => {
                    warn!(user_id = %participant.user_id, error = %e, "参与者加载失败，跳过");
                    continue;
                }
            };

            let mut context = self.base_context(&recipient);
            self.add_request_fields(&mut context, &request);
            context
                .set("sender_nickname", sender.nickname.clone())
                .set("message_content", message.content.clone())
                .set("thread_url", format!("{}/messages/{}", self.ui_url, thread_id));

            planned.push(PlannedNotice {
                recipient,
                template: TemplateKey::NewMessage,
                request_id: Some(request.id),
                subject: Subject::Message(message_id),
                context,
            });
        }

        Ok(planned)
    }

    /// 渲染并按渠道投递，返回成功投递的任务数
    fn enqueue(&self, notice: PlannedNotice) -> usize {
        let rendered = match self.templates.render(
            notice.template,
            &notice.recipient.locale,
            &notice.context,
        ) {
            Ok(rendered) => rendered,
            Err(e) => {
                error!(template = %notice.template, error = %e, "模板渲染失败");
                return 0;
            }
        };

        let mut enqueued = 0;
        for channel in notice.recipient.contact_preference.channels() {
            let delivery = Delivery {
                recipient_id: notice.recipient.id,
                template: notice.template,
                channel: *channel,
                subject: rendered.subject.clone(),
                body: rendered.body.clone(),
            };
            let job = match notice.subject {
                Subject::Message(message_id) => Job::NewMessage {
                    message_id,
                    delivery,
                },
                Subject::Request(request_id) => Job::RequestStatus {
                    request_id,
                    delivery,
                },
                Subject::User(user_id) => Job::UserWelcome { user_id, delivery },
            };

            match self.queue.enqueue(job) {
                Ok(()) => {
                    metrics::record_notification_enqueued(notice.template.as_str(), channel.as_str());
                    enqueued += 1;
                }
                Err(e) => {
                    warn!(
                        recipient_id = %notice.recipient.id,
                        channel = %channel,
                        error = %e,
                        "通知任务投递失败"
                    );
                }
            }
        }

        enqueued
    }

    fn base_context(&self, recipient: &User) -> TemplateContext {
        let mut context = TemplateContext::new();
        context
            .set("recipient_nickname", recipient.nickname.clone())
            .set("recipient_first_name", recipient.first_name.clone())
            .set("ui_url", self.ui_url.clone());
        context
    }

    fn add_request_fields(&self, context: &mut TemplateContext, request: &Request) {
        context
            .set("request_title", request.title.clone())
            .set("request_description", request.description.clone())
            .set("request_origin", request.origin.clone())
            .set("request_destination", request.destination.clone())
            .set("request_size", request.size.as_str())
            .set("request_status", request.status.as_str())
            .set("request_url", format!("{}/requests/{}", self.ui_url, request.id));
    }

    async fn load_user(&self, id: UserId) -> Result<User> {
        self.users
            .get_user(id)
            .await?
            .ok_or_else(|| AppError::not_found("user", id))
    }

    async fn load_request(&self, id: RequestId) -> Result<Request> {
        self.requests
            .get_request(id)
            .await?
            .ok_or_else(|| AppError::not_found("request", id))
    }
}

#[async_trait]
impl EventListener for Dispatcher {
    fn name(&self) -> &str {
        "notification-dispatcher"
    }

    async fn on_events(&self, events: &[DomainEvent]) -> Result<()> {
        let enqueued = self.dispatch(events).await;
        debug!(events = events.len(), enqueued, "事件已转换为通知任务");
        Ok(())
    }
}
