//! 仓储 Trait 定义
//!
//! 服务层依赖抽象而非具体实现：生产用 Postgres，测试和本地调试用内存实现，单元测试可用 mock。

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::models::{
    Message, MessageId, NewMessage, NewRequest, NewUser, Request, RequestId, StatusChange,
    StatusChangeOutcome, Thread, ThreadId, ThreadParticipant, User, UserId,
};

/// 用户仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UserRepositoryTrait: Send + Sync {
    async fn get_user(&self, id: UserId) -> Result<Option<User>>;
    async fn create_user(&self, user: &NewUser) -> Result<User>;
}

/// 请求仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RequestRepositoryTrait: Send + Sync {
    async fn get_request(&self, id: RequestId) -> Result<Option<Request>>;
    async fn create_request(&self, request: &NewRequest) -> Result<Request>;

    /// 在单个事务内完成状态迁移（行锁 + 状态校验 + 写入 + 建立会话）
    async fn apply_status_change(&self, change: &StatusChange) -> Result<StatusChangeOutcome>;
}

/// 会话仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ThreadRepositoryTrait: Send + Sync {
    async fn get_thread(&self, id: ThreadId) -> Result<Option<Thread>>;

    /// 查找请求下包含该用户的会话
    async fn find_thread(&self, request_id: RequestId, user_id: UserId) -> Result<Option<Thread>>;

    /// 创建或获取发布者与另一用户之间的会话，并补齐双方参与者
    async fn ensure_thread(
        &self,
        request_id: RequestId,
        creator_id: UserId,
        other_id: UserId,
    ) -> Result<Thread>;

    /// 添加参与者，已存在时不做修改
    async fn add_participant(&self, thread_id: ThreadId, user_id: UserId) -> Result<()>;

    async fn list_participants(&self, thread_id: ThreadId) -> Result<Vec<ThreadParticipant>>;

    /// 校验发送者身份、写入消息并推进发送者的已读时间，三者同一事务
    async fn append_message(&self, message: &NewMessage) -> Result<Message>;

    async fn get_message(&self, id: MessageId) -> Result<Option<Message>>;

    /// last_viewed_at = max(当前值, at)
    async fn mark_viewed(
        &self,
        thread_id: ThreadId,
        user_id: UserId,
        at: DateTime<Utc>,
    ) -> Result<ThreadParticipant>;

    async fn unread_count(&self, thread_id: ThreadId, user_id: UserId) -> Result<i64>;
}
