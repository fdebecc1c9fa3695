//! 核心服务装配
//!
//! 仓储、事件总线、模板、调度器、状态机、会话管理都在这里显式构造并注入，
//! 不依赖任何进程级单例。对外暴露 API 层需要的全部核心操作。

use std::sync::Arc;

use chrono::Utc;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use tracing::info;
use wecarry_shared::config::WorkerConfig;
use wecarry_shared::reporting::ErrorReporter;
use wecarry_shared::retry::RetryPolicy;

use crate::error::{AppError, Result};
use crate::events::{DomainEvent, EventBus};
use crate::lifecycle::{StateMachine, TransitionOutcome};
use crate::models::{
    Message, NewRequest, NewUser, Request, RequestId, RequestStatus, Thread, ThreadId,
    ThreadParticipant, User, UserId,
};
use crate::notification::{Dispatcher, Senders, TemplateRegistry};
use crate::repository::{
    MemoryStore, RequestRepository, RequestRepositoryTrait, ThreadRepository,
    ThreadRepositoryTrait, UserRepository, UserRepositoryTrait,
};
use crate::thread::{ThreadManager, ThreadView};
use crate::worker::{
    DeliveryService, JobQueue, NewMessageHandler, RequestStatusHandler, SenderIdentity,
    UserWelcomeHandler, Worker, jobs,
};

/// 仓储集合
#[derive(Clone)]
pub struct Repositories {
    pub users: Arc<dyn UserRepositoryTrait>,
    pub requests: Arc<dyn RequestRepositoryTrait>,
    pub threads: Arc<dyn ThreadRepositoryTrait>,
}

impl Repositories {
    pub fn postgres(pool: PgPool) -> Self {
        Self {
            users: Arc::new(UserRepository::new(pool.clone())),
            requests: Arc::new(RequestRepository::new(pool.clone())),
            threads: Arc::new(ThreadRepository::new(pool)),
        }
    }

    pub fn memory(store: Arc<MemoryStore>) -> Self {
        Self {
            users: store.clone(),
            requests: store.clone(),
            threads: store,
        }
    }
}

/// 构建 Worker 并注册全部通知任务处理器
pub fn build_worker(
    repos: &Repositories,
    senders: Senders,
    identity: SenderIdentity,
    config: &WorkerConfig,
    reporter: Arc<dyn ErrorReporter>,
) -> Worker {
    let delivery = Arc::new(DeliveryService::new(repos.users.clone(), senders, identity));
    let policy = RetryPolicy::with_max_attempts(
        config.max_attempts,
        std::time::Duration::from_millis(config.initial_backoff_ms),
        std::time::Duration::from_millis(config.max_backoff_ms),
    );

    Worker::builder(policy, reporter)
        .register(
            jobs::NEW_MESSAGE,
            Arc::new(NewMessageHandler::new(repos.threads.clone(), delivery.clone())),
        )
        .register(
            jobs::REQUEST_STATUS,
            Arc::new(RequestStatusHandler::new(repos.requests.clone(), delivery.clone())),
        )
        .register(
            jobs::USER_WELCOME,
            Arc::new(UserWelcomeHandler::new(repos.users.clone(), delivery)),
        )
        .start(config.pool_size)
}

pub struct Core {
    repos: Repositories,
    bus: Arc<EventBus>,
    state_machine: StateMachine,
    threads: ThreadManager,
    reporter: Arc<dyn ErrorReporter>,
}

impl Core {
    /// 装配核心服务；模板不完整时返回配置错误
    pub fn new(
        repos: Repositories,
        templates: Arc<TemplateRegistry>,
        queue: Arc<dyn JobQueue>,
        reporter: Arc<dyn ErrorReporter>,
        ui_url: &str,
    ) -> Result<Self> {
        let bus = Arc::new(EventBus::new());

        let dispatcher = Arc::new(Dispatcher::new(
            repos.users.clone(),
            repos.requests.clone(),
            repos.threads.clone(),
            templates,
            queue,
            ui_url,
        )?);
        bus.subscribe(dispatcher);

        let state_machine = StateMachine::new(repos.requests.clone(), bus.clone());
        let threads = ThreadManager::new(
            repos.threads.clone(),
            repos.requests.clone(),
            repos.users.clone(),
            bus.clone(),
        );

        info!(listeners = bus.listener_count(), "核心服务已装配");

        Ok(Self {
            repos,
            bus,
            state_machine,
            threads,
            reporter,
        })
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn reporter(&self) -> &Arc<dyn ErrorReporter> {
        &self.reporter
    }

    // ==================== 用户 ====================

    pub async fn create_user(&self, user: NewUser) -> Result<User> {
        if !user.email.contains('@') {
            return Err(AppError::Validation(format!("邮箱格式无效: {}", user.email)));
        }
        if user.nickname.trim().is_empty() {
            return Err(AppError::Validation("昵称不能为空".to_string()));
        }

        let created = self.repos.users.create_user(&user).await?;
        info!(user_id = %created.id, "用户已创建");
        self.bus
            .emit(DomainEvent::UserCreated {
                user_id: created.id,
            })
            .await;
        Ok(created)
    }

    pub async fn get_user(&self, id: UserId) -> Result<User> {
        self.repos
            .users
            .get_user(id)
            .await?
            .ok_or_else(|| AppError::not_found("user", id))
    }

    // ==================== 请求 ====================

    pub async fn create_request(&self, request: NewRequest) -> Result<Request> {
        if request.title.trim().is_empty() {
            return Err(AppError::Validation("标题不能为空".to_string()));
        }
        if request.destination.trim().is_empty() {
            return Err(AppError::Validation("目的地不能为空".to_string()));
        }
        if let (Some(after), Some(before)) = (request.needed_after, request.needed_before) {
            if after > before {
                return Err(AppError::Validation(
                    "needed_after 不能晚于 needed_before".to_string(),
                ));
            }
        }
        self.get_user(request.creator_id).await?;

        let created = self.repos.requests.create_request(&request).await?;
        info!(request_id = %created.id, creator_id = %created.creator_id, "请求已创建");
        self.bus
            .emit(DomainEvent::RequestCreated {
                request_id: created.id,
                creator_id: created.creator_id,
            })
            .await;
        Ok(created)
    }

    pub async fn get_request(&self, id: RequestId) -> Result<Request> {
        self.repos
            .requests
            .get_request(id)
            .await?
            .ok_or_else(|| AppError::not_found("request", id))
    }

    pub async fn transition_request(
        &self,
        request_id: RequestId,
        target: RequestStatus,
        actor_id: UserId,
        cancel: &CancellationToken,
    ) -> Result<TransitionOutcome> {
        self.state_machine
            .transition(request_id, target, actor_id, cancel)
            .await
    }

    // ==================== 会话 ====================

    pub async fn get_or_create_thread(
        &self,
        request_id: RequestId,
        other_id: UserId,
    ) -> Result<Thread> {
        self.threads.get_or_create_thread(request_id, other_id).await
    }

    pub async fn add_participant(
        &self,
        thread_id: ThreadId,
        user_id: UserId,
        actor_id: UserId,
    ) -> Result<Vec<ThreadParticipant>> {
        self.threads.add_participant(thread_id, user_id, actor_id).await
    }

    pub async fn send_message(
        &self,
        thread_id: ThreadId,
        sender_id: UserId,
        content: &str,
    ) -> Result<Message> {
        self.threads.send_message(thread_id, sender_id, content).await
    }

    /// 以当前时间标记已读
    pub async fn mark_thread_viewed(
        &self,
        thread_id: ThreadId,
        user_id: UserId,
    ) -> Result<ThreadParticipant> {
        self.threads.mark_viewed(thread_id, user_id, Utc::now()).await
    }

    pub async fn unread_count(&self, thread_id: ThreadId, user_id: UserId) -> Result<i64> {
        self.threads.unread_count(thread_id, user_id).await
    }

    pub async fn get_thread(&self, thread_id: ThreadId, viewer_id: UserId) -> Result<ThreadView> {
        self.threads.get_thread(thread_id, viewer_id).await
    }
}
