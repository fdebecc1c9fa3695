//! 会话、参与者与消息

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{MessageId, RequestId, ThreadId, UserId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Thread {
    pub id: ThreadId,
    pub request_id: RequestId,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct ThreadParticipant {
    pub thread_id: ThreadId,
    pub user_id: UserId,
    /// 为空表示从未查看过
    pub last_viewed_at: Option<DateTime<Utc>>,
}

impl ThreadParticipant {
    /// 该消息对此参与者是否未读
    pub fn is_unread(&self, sent_at: DateTime<Utc>) -> bool {
        self.last_viewed_at.is_none_or(|viewed| sent_at > viewed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Message {
    pub id: MessageId,
    pub thread_id: ThreadId,
    pub sender_id: UserId,
    pub content: String,
    pub sent_at: DateTime<Utc>,
}

/// 追加消息参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub thread_id: ThreadId,
    pub sender_id: UserId,
    pub content: String,
    pub sent_at: DateTime<Utc>,
}
