//! 请求实体

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::enums::{RequestKind, RequestSize, RequestStatus, RequestVisibility};
use super::ids::{RequestId, UserId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Request {
    pub id: RequestId,
    pub creator_id: UserId,
    /// 承接者，仅在 committed 及之后的状态存在
    pub provider_id: Option<UserId>,
    pub title: String,
    pub description: String,
    pub origin: String,
    pub destination: String,
    pub size: RequestSize,
    pub kind: RequestKind,
    pub status: RequestStatus,
    pub visibility: RequestVisibility,
    /// 需求时间窗口
    pub needed_after: Option<DateTime<Utc>>,
    pub needed_before: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 创建请求参数
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRequest {
    pub creator_id: UserId,
    pub title: String,
    pub description: String,
    pub origin: String,
    pub destination: String,
    pub size: RequestSize,
    pub kind: RequestKind,
    pub visibility: RequestVisibility,
    pub needed_after: Option<DateTime<Utc>>,
    pub needed_before: Option<DateTime<Utc>>,
}

/// 状态迁移对承接者字段的影响
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderUpdate {
    Keep,
    Set(UserId),
    Clear,
}

impl ProviderUpdate {
    pub fn apply(&self, current: Option<UserId>) -> Option<UserId> {
        match self {
            Self::Keep => current,
            Self::Set(id) => Some(*id),
            Self::Clear => None,
        }
    }
}

/// 一次待提交的状态迁移
///
/// 仓储在同一事务内锁定请求行、校验 expected、写入新状态和承接者，
/// 需要时顺带建立会话。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChange {
    pub request_id: RequestId,
    pub expected: RequestStatus,
    pub target: RequestStatus,
    pub provider: ProviderUpdate,
    /// 需要在发布者和该用户之间建立会话
    pub open_thread_with: Option<UserId>,
    pub at: DateTime<Utc>,
}

/// 状态迁移提交结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusChangeOutcome {
    Applied {
        request: Request,
        thread: Option<super::thread::Thread>,
    },
    /// 加锁后发现状态已被其他事务修改，未写入任何数据
    Conflict { current: Request },
}
