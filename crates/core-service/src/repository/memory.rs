//! 内存仓储
//!
//! 用于本地调试（`storage = "memory"`）和测试。所有写操作串行执行，
//! 等价于 Postgres 实现中行锁 + 事务的效果。

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::Mutex;

use super::traits::{RequestRepositoryTrait, ThreadRepositoryTrait, UserRepositoryTrait};
use crate::error::{AppError, Result};
use crate::models::{
    Message, MessageId, NewMessage, NewRequest, NewUser, Request, RequestId, RequestStatus,
    StatusChange, StatusChangeOutcome, Thread, ThreadId, ThreadParticipant, User, UserId,
};

#[derive(Default)]
pub struct MemoryStore {
    users: DashMap<UserId, User>,
    requests: DashMap<RequestId, Request>,
    threads: DashMap<ThreadId, Thread>,
    participants: DashMap<(ThreadId, UserId), ThreadParticipant>,
    messages: DashMap<MessageId, Message>,
    sequence: AtomicI64,
    write_lock: Mutex<()>,
    fail_next_commit: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 下一次事务性写入（状态迁移、追加消息）返回数据库错误且不落任何数据
    pub fn fail_next_commit(&self) {
        self.fail_next_commit.store(true, Ordering::SeqCst);
    }

    pub fn message_count(&self, thread_id: ThreadId) -> usize {
        self.messages
            .iter()
            .filter(|m| m.thread_id == thread_id)
            .count()
    }

    pub fn thread_count(&self, request_id: RequestId) -> usize {
        self.threads
            .iter()
            .filter(|t| t.request_id == request_id)
            .count()
    }

    fn next_id(&self) -> i64 {
        self.sequence.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn check_commit(&self) -> Result<()> {
        if self.fail_next_commit.swap(false, Ordering::SeqCst) {
            return Err(AppError::Database(sqlx::Error::Protocol(
                "模拟提交失败".to_string(),
            )));
        }
        Ok(())
    }

    fn participant(&self, thread_id: ThreadId, user_id: UserId) -> Result<ThreadParticipant> {
        self.participants
            .get(&(thread_id, user_id))
            .map(|p| p.value().clone())
            .ok_or(AppError::NotThreadParticipant {
                thread_id: thread_id.value(),
                user_id: user_id.value(),
            })
    }

    fn find_thread_sync(&self, request_id: RequestId, user_id: UserId) -> Option<Thread> {
        let mut candidates: Vec<Thread> = self
            .threads
            .iter()
            .filter(|t| t.request_id == request_id)
            .filter(|t| self.participants.contains_key(&(t.id, user_id)))
            .map(|t| t.value().clone())
            .collect();
        candidates.sort_by_key(|t| t.id);
        candidates.into_iter().next()
    }

    /// 调用方须持有写锁
    fn ensure_thread_locked(
        &self,
        request_id: RequestId,
        creator_id: UserId,
        other_id: UserId,
        at: DateTime<Utc>,
    ) -> Thread {
        let thread = match self.find_thread_sync(request_id, other_id) {
            Some(thread) => thread,
            None => {
                let thread = Thread {
                    id: ThreadId(self.next_id()),
                    request_id,
                    created_at: at,
                };
                self.threads.insert(thread.id, thread.clone());
                thread
            }
        };

        for user_id in [other_id, creator_id] {
            self.participants
                .entry((thread.id, user_id))
                .or_insert_with(|| ThreadParticipant {
                    thread_id: thread.id,
                    user_id,
                    last_viewed_at: None,
                });
        }

        thread
    }
}

#[async_trait]
impl UserRepositoryTrait for MemoryStore {
    async fn get_user(&self, id: UserId) -> Result<Option<User>> {
        Ok(self.users.get(&id).map(|u| u.value().clone()))
    }

    async fn create_user(&self, user: &NewUser) -> Result<User> {
        let created = User {
            id: UserId(self.next_id()),
            email: user.email.clone(),
            nickname: user.nickname.clone(),
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            phone_number: user.phone_number.clone(),
            contact_preference: user.contact_preference,
            locale: user.locale.clone(),
            created_at: Utc::now(),
        };
        self.users.insert(created.id, created.clone());
        Ok(created)
    }
}

#[async_trait]
impl RequestRepositoryTrait for MemoryStore {
    async fn get_request(&self, id: RequestId) -> Result<Option<Request>> {
        Ok(self.requests.get(&id).map(|r| r.value().clone()))
    }

    async fn create_request(&self, request: &NewRequest) -> Result<Request> {
        let now = Utc::now();
        let created = Request {
            id: RequestId(self.next_id()),
            creator_id: request.creator_id,
            provider_id: None,
            title: request.title.clone(),
            description: request.description.clone(),
            origin: request.origin.clone(),
            destination: request.destination.clone(),
            size: request.size,
            kind: request.kind,
            status: RequestStatus::Open,
            visibility: request.visibility,
            needed_after: request.needed_after,
            needed_before: request.needed_before,
            created_at: now,
            updated_at: now,
        };
        self.requests.insert(created.id, created.clone());
        Ok(created)
    }

    async fn apply_status_change(&self, change: &StatusChange) -> Result<StatusChangeOutcome> {
        let _guard = self.write_lock.lock().await;

        let current = self
            .requests
            .get(&change.request_id)
            .map(|r| r.value().clone())
            .ok_or_else(|| AppError::not_found("request", change.request_id))?;

        if current.status != change.expected {
            return Ok(StatusChangeOutcome::Conflict { current });
        }

        self.check_commit()?;

        let mut request = current;
        request.status = change.target;
        request.provider_id = change.provider.apply(request.provider_id);
        request.updated_at = change.at;

        let thread = change.open_thread_with.map(|other_id| {
            self.ensure_thread_locked(request.id, request.creator_id, other_id, change.at)
        });
        self.requests.insert(request.id, request.clone());

        Ok(StatusChangeOutcome::Applied { request, thread })
    }
}

#[async_trait]
impl ThreadRepositoryTrait for MemoryStore {
    async fn get_thread(&self, id: ThreadId) -> Result<Option<Thread>> {
        Ok(self.threads.get(&id).map(|t| t.value().clone()))
    }

    async fn find_thread(&self, request_id: RequestId, user_id: UserId) -> Result<Option<Thread>> {
        Ok(self.find_thread_sync(request_id, user_id))
    }

    async fn ensure_thread(
        &self,
        request_id: RequestId,
        creator_id: UserId,
        other_id: UserId,
    ) -> Result<Thread> {
        let _guard = self.write_lock.lock().await;

        if !self.requests.contains_key(&request_id) {
            return Err(AppError::not_found("request", request_id));
        }

        Ok(self.ensure_thread_locked(request_id, creator_id, other_id, Utc::now()))
    }

    async fn add_participant(&self, thread_id: ThreadId, user_id: UserId) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        if !self.threads.contains_key(&thread_id) {
            return Err(AppError::not_found("thread", thread_id));
        }
        self.participants
            .entry((thread_id, user_id))
            .or_insert_with(|| ThreadParticipant {
                thread_id,
                user_id,
                last_viewed_at: None,
            });
        Ok(())
    }

    async fn list_participants(&self, thread_id: ThreadId) -> Result<Vec<ThreadParticipant>> {
        let mut participants: Vec<ThreadParticipant> = self
            .participants
            .iter()
            .filter(|p| p.thread_id == thread_id)
            .map(|p| p.value().clone())
            .collect();
        participants.sort_by_key(|p| p.user_id);
        Ok(participants)
    }

    async fn append_message(&self, message: &NewMessage) -> Result<Message> {
        let _guard = self.write_lock.lock().await;

        self.participant(message.thread_id, message.sender_id)?;
        self.check_commit()?;

        let created = Message {
            id: MessageId(self.next_id()),
            thread_id: message.thread_id,
            sender_id: message.sender_id,
            content: message.content.clone(),
            sent_at: message.sent_at,
        };
        self.messages.insert(created.id, created.clone());

        if let Some(mut sender) = self
            .participants
            .get_mut(&(message.thread_id, message.sender_id))
        {
            sender.last_viewed_at = Some(
                sender
                    .last_viewed_at
                    .map_or(created.sent_at, |viewed| viewed.max(created.sent_at)),
            );
        }

        Ok(created)
    }

    async fn get_message(&self, id: MessageId) -> Result<Option<Message>> {
        Ok(self.messages.get(&id).map(|m| m.value().clone()))
    }

    async fn mark_viewed(
        &self,
        thread_id: ThreadId,
        user_id: UserId,
        at: DateTime<Utc>,
    ) -> Result<ThreadParticipant> {
        let _guard = self.write_lock.lock().await;

        let mut participant = self.participants.get_mut(&(thread_id, user_id)).ok_or(
            AppError::NotThreadParticipant {
                thread_id: thread_id.value(),
                user_id: user_id.value(),
            },
        )?;
        participant.last_viewed_at =
            Some(participant.last_viewed_at.map_or(at, |viewed| viewed.max(at)));

        Ok(participant.value().clone())
    }

    async fn unread_count(&self, thread_id: ThreadId, user_id: UserId) -> Result<i64> {
        let participant = self.participant(thread_id, user_id)?;

        let count = self
            .messages
            .iter()
            .filter(|m| m.thread_id == thread_id && participant.is_unread(m.sent_at))
            .count();

        Ok(count as i64)
    }
}
