//! 领域枚举类型定义
//!
//! 所有枚举都支持数据库（sqlx，小写 varchar）和 JSON（serde）序列化

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use wecarry_shared::error::AppError;

/// 请求状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
pub enum RequestStatus {
    /// 已发布，等待有人承接
    Open,
    /// 有人表示愿意承接，等待发布者确认
    Committed,
    /// 发布者已接受承接
    Accepted,
    /// 发布者确认已收到
    Received,
    /// 承接者标记已送达
    Delivered,
    Completed,
    Removed,
}

impl RequestStatus {
    pub const ALL: [RequestStatus; 7] = [
        Self::Open,
        Self::Committed,
        Self::Accepted,
        Self::Received,
        Self::Delivered,
        Self::Completed,
        Self::Removed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Committed => "committed",
            Self::Accepted => "accepted",
            Self::Received => "received",
            Self::Delivered => "delivered",
            Self::Completed => "completed",
            Self::Removed => "removed",
        }
    }

    /// 该状态下是否必须有承接者
    pub fn requires_provider(&self) -> bool {
        matches!(
            self,
            Self::Committed | Self::Accepted | Self::Received | Self::Delivered | Self::Completed
        )
    }

    /// 终态不再有出边
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Removed)
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| AppError::Validation(format!("未知的请求状态: {s}")))
    }
}

/// 通知渠道
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Email,
    Mobile,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Mobile => "mobile",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 用户联系偏好
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
pub enum ContactPreference {
    /// 仅邮件
    #[default]
    Email,
    /// 仅短信/推送
    Text,
    Both,
}

impl ContactPreference {
    /// 偏好对应的通知渠道，顺序固定：邮件在前
    pub fn channels(&self) -> &'static [Channel] {
        match self {
            Self::Email => &[Channel::Email],
            Self::Text => &[Channel::Mobile],
            Self::Both => &[Channel::Email, Channel::Mobile],
        }
    }
}

/// 请求类型
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
pub enum RequestKind {
    /// 求带物品
    #[default]
    Request,
    /// 主动提供顺带
    Offer,
}

/// 物品尺寸
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
pub enum RequestSize {
    Tiny,
    #[default]
    Small,
    Medium,
    Large,
    Xlarge,
}

impl RequestSize {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tiny => "tiny",
            Self::Small => "small",
            Self::Medium => "medium",
            Self::Large => "large",
            Self::Xlarge => "xlarge",
        }
    }
}

/// 可见范围
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
pub enum RequestVisibility {
    /// 所有人可见
    #[default]
    All,
    /// 仅受信任组织成员可见
    Trusted,
    /// 仅同组织成员可见
    Same,
}
