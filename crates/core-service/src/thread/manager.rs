//! 会话与参与者管理
//!
//! 会话在请求上首次发生用户间互动时惰性创建，之后与请求共存。消息只追加；
//! 已读位置（last_viewed_at）按 (会话, 用户) 单调不减。

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, instrument};
use wecarry_shared::observability::metrics;

use crate::error::{AppError, Result};
use crate::events::{DomainEvent, EventBus};
use crate::models::{
    Message, NewMessage, RequestId, Thread, ThreadId, ThreadParticipant, UserId,
};
use crate::repository::{RequestRepositoryTrait, ThreadRepositoryTrait, UserRepositoryTrait};

/// 消息长度上限（字符）
pub const MAX_MESSAGE_CHARS: usize = 4096;

/// 会话详情（含查看者的未读数）
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ThreadView {
    pub thread: Thread,
    pub participants: Vec<ThreadParticipant>,
    pub unread_count: i64,
}

pub struct ThreadManager {
    threads: Arc<dyn ThreadRepositoryTrait>,
    requests: Arc<dyn RequestRepositoryTrait>,
    users: Arc<dyn UserRepositoryTrait>,
    bus: Arc<EventBus>,
}

impl ThreadManager {
    pub fn new(
        threads: Arc<dyn ThreadRepositoryTrait>,
        requests: Arc<dyn RequestRepositoryTrait>,
        users: Arc<dyn UserRepositoryTrait>,
        bus: Arc<EventBus>,
    ) -> Self {
        Self {
            threads,
            requests,
            users,
            bus,
        }
    }

    /// 创建或获取请求发布者与另一用户之间的会话，不发事件
    #[instrument(skip(self))]
    pub async fn get_or_create_thread(
        &self,
        request_id: RequestId,
        other_id: UserId,
    ) -> Result<Thread> {
        let request = self
            .requests
            .get_request(request_id)
            .await?
            .ok_or_else(|| AppError::not_found("request", request_id))?;

        if other_id == request.creator_id {
            return Err(AppError::Validation(
                "发布者不能与自己建立会话".to_string(),
            ));
        }
        self.ensure_user(other_id).await?;

        self.threads
            .ensure_thread(request.id, request.creator_id, other_id)
            .await
    }

    /// 由现有参与者邀请新参与者
    #[instrument(skip(self))]
    pub async fn add_participant(
        &self,
        thread_id: ThreadId,
        user_id: UserId,
        actor_id: UserId,
    ) -> Result<Vec<ThreadParticipant>> {
        self.ensure_participant(thread_id, actor_id).await?;
        self.ensure_user(user_id).await?;

        self.threads.add_participant(thread_id, user_id).await?;
        self.threads.list_participants(thread_id).await
    }

    /// 追加消息并在提交后发出 `thread:message-added`
    #[instrument(skip(self, content), fields(len = content.len()))]
    pub async fn send_message(
        &self,
        thread_id: ThreadId,
        sender_id: UserId,
        content: &str,
    ) -> Result<Message> {
        let content = content.trim();
        if content.is_empty() {
            return Err(AppError::Validation("消息内容不能为空".to_string()));
        }
        if content.chars().count() > MAX_MESSAGE_CHARS {
            return Err(AppError::Validation(format!(
                "消息长度不能超过 {MAX_MESSAGE_CHARS} 个字符"
            )));
        }

        self.load_thread(thread_id).await?;

        let new_message = NewMessage {
            thread_id,
            sender_id,
            content: content.to_string(),
            sent_at: Utc::now(),
        };

        // 提交与发事件在独立任务中完成，调用方提交后被取消也不会丢事件
        let threads = self.threads.clone();
        let bus = self.bus.clone();
        let message = tokio::spawn(async move {
            let message = threads.append_message(&new_message).await?;
            bus.emit(DomainEvent::MessageAdded {
                thread_id: message.thread_id,
                message_id: message.id,
                sender_id: message.sender_id,
            })
            .await;
            Ok::<_, AppError>(message)
        })
        .await
        .map_err(|e| AppError::Internal(format!("消息写入任务异常退出: {e}")))??;

        metrics::record_thread_message();
        debug!(message_id = %message.id, "消息已写入");
        Ok(message)
    }

    /// last_viewed_at = max(当前值, at)
    pub async fn mark_viewed(
        &self,
        thread_id: ThreadId,
        user_id: UserId,
        at: DateTime<Utc>,
    ) -> Result<ThreadParticipant> {
        self.load_thread(thread_id).await?;
        self.threads.mark_viewed(thread_id, user_id, at).await
    }

    pub async fn unread_count(&self, thread_id: ThreadId, user_id: UserId) -> Result<i64> {
        self.load_thread(thread_id).await?;
        self.threads.unread_count(thread_id, user_id).await
    }

    /// 查看会话，查看者必须是参与者
    pub async fn get_thread(&self, thread_id: ThreadId, viewer_id: UserId) -> Result<ThreadView> {
        let thread = self.load_thread(thread_id).await?;
        let participants = self.ensure_participant(thread_id, viewer_id).await?;
        let unread_count = self.threads.unread_count(thread_id, viewer_id).await?;

        Ok(ThreadView {
            thread,
            participants,
            unread_count,
        })
    }

    /// 校验用户是会话参与者，返回全部参与者
    async fn ensure_participant(
        &self,
        thread_id: ThreadId,
        user_id: UserId,
    ) -> Result<Vec<ThreadParticipant>> {
        let participants = self.threads.list_participants(thread_id).await?;
        if participants.iter().any(|p| p.user_id == user_id) {
            Ok(participants)
        } else {
            Err(AppError::NotThreadParticipant {
                thread_id: thread_id.value(),
                user_id: user_id.value(),
            })
        }
    }

    async fn load_thread(&self, thread_id: ThreadId) -> Result<Thread> {
        self.threads
            .get_thread(thread_id)
            .await?
            .ok_or_else(|| AppError::not_found("thread", thread_id))
    }

    async fn ensure_user(&self, user_id: UserId) -> Result<()> {
        self.users
            .get_user(user_id)
            .await?
            .map(|_| ())
            .ok_or_else(|| AppError::not_found("user", user_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewRequest, NewUser, User};
    use crate::repository::MemoryStore;

    struct Fixture {
        store: Arc<MemoryStore>,
        manager: ThreadManager,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let manager = ThreadManager::new(
            store.clone(),
            store.clone(),
            store.clone(),
            Arc::new(EventBus::new()),
        );
        Fixture { store, manager }
    }

    async fn user(store: &MemoryStore, name: &str) -> User {
        store
            .create_user(&NewUser {
                email: format!("{name}@example.com"),
                nickname: name.into(),
                ..Default::default()
            })
            .await
            .unwrap()
    }

    async fn request_by(store: &MemoryStore, creator: &User) -> RequestId {
        store
            .create_request(&NewRequest {
                creator_id: creator.id,
                title: "Spices".into(),
                description: String::new(),
                origin: "Zanzibar".into(),
                destination: "Oslo".into(),
                size: Default::default(),
                kind: Default::default(),
                visibility: Default::default(),
                needed_after: None,
                needed_before: None,
            })
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn test_creator_cannot_open_thread_with_self() {
        let f = fixture();
        let a = user(&f.store, "a").await;
        let request_id = request_by(&f.store, &a).await;

        let err = f
            .manager
            .get_or_create_thread(request_id, a.id)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn test_send_message_updates_sender_view() {
        let f = fixture();
        let a = user(&f.store, "a").await;
        let b = user(&f.store, "b").await;
        let request_id = request_by(&f.store, &a).await;
        let thread = f.manager.get_or_create_thread(request_id, b.id).await.unwrap();

        let message = f.manager.send_message(thread.id, b.id, "  hi there ").await.unwrap();
        assert_eq!(message.content, "hi there");

        let view = f.manager.get_thread(thread.id, b.id).await.unwrap();
        let sender = view.participants.iter().find(|p| p.user_id == b.id).unwrap();
        assert_eq!(sender.last_viewed_at, Some(message.sent_at));
        assert_eq!(view.unread_count, 0);
        assert_eq!(f.manager.unread_count(thread.id, a.id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_unknown_thread_is_not_found() {
        let f = fixture();
        let a = user(&f.store, "a").await;
        let missing = ThreadId(4040);

        let err = f.manager.mark_viewed(missing, a.id, Utc::now()).await.unwrap_err();
        assert_eq!(err.category(), crate::error::ErrorCategory::NotFound);
        assert_eq!(err.key(), crate::error::ErrorKey::NoRows);

        let err = f.manager.unread_count(missing, a.id).await.unwrap_err();
        assert_eq!(err.key(), crate::error::ErrorKey::NoRows);
    }

    #[tokio::test]
    async fn test_outsider_cannot_post_or_view() {
        let f = fixture();
        let a = user(&f.store, "a").await;
        let b = user(&f.store, "b").await;
        let c = user(&f.store, "c").await;
        let request_id = request_by(&f.store, &a).await;
        let thread = f.manager.get_or_create_thread(request_id, b.id).await.unwrap();

        let err = f.manager.send_message(thread.id, c.id, "hello").await.unwrap_err();
        assert_eq!(err.category(), crate::error::ErrorCategory::Forbidden);
        assert_eq!(f.store.message_count(thread.id), 0);

        assert!(f.manager.get_thread(thread.id, c.id).await.is_err());
    }

    #[tokio::test]
    async fn test_add_participant_requires_member_actor() {
        let f = fixture();
        let a = user(&f.store, "a").await;
        let b = user(&f.store, "b").await;
        let c = user(&f.store, "c").await;
        let request_id = request_by(&f.store, &a).await;
        let thread = f.manager.get_or_create_thread(request_id, b.id).await.unwrap();

        assert!(f.manager.add_participant(thread.id, c.id, c.id).await.is_err());

        let participants = f.manager.add_participant(thread.id, c.id, a.id).await.unwrap();
        assert_eq!(participants.len(), 3);
    }

    #[tokio::test]
    async fn test_empty_message_is_rejected() {
        let f = fixture();
        let err = f
            .manager
            .send_message(ThreadId(1), UserId(1), "   ")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }
}
