//! 用户实体

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::enums::{Channel, ContactPreference};
use super::ids::UserId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: UserId,
    pub email: String,
    /// 展示名
    pub nickname: String,
    pub first_name: String,
    pub last_name: String,
    /// 接收短信/推送的号码
    pub phone_number: Option<String>,
    pub contact_preference: ContactPreference,
    pub locale: String,
    pub created_at: DateTime<Utc>,
}

impl User {
    /// 指定渠道的收件地址，缺失时返回 None
    pub fn address_for(&self, channel: Channel) -> Option<&str> {
        match channel {
            Channel::Email => Some(self.email.as_str()).filter(|e| !e.is_empty()),
            Channel::Mobile => self.phone_number.as_deref().filter(|p| !p.is_empty()),
        }
    }
}

/// 创建用户参数
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NewUser {
    pub email: String,
    pub nickname: String,
    pub first_name: String,
    pub last_name: String,
    pub phone_number: Option<String>,
    pub contact_preference: ContactPreference,
    pub locale: String,
}
