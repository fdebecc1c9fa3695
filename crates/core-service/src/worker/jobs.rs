//! 后台任务定义
//!
//! 每种任务是一个带类型的变体，`name()` 即注册名。

use serde::{Deserialize, Serialize};

use crate::models::{Channel, MessageId, RequestId, UserId};
use crate::notification::template::TemplateKey;

pub const NEW_MESSAGE: &str = "new_message";
pub const REQUEST_STATUS: &str = "request_status";
pub const USER_WELCOME: &str = "user_welcome";

/// 一条已渲染、待投递的通知
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delivery {
    pub recipient_id: UserId,
    pub template: TemplateKey,
    pub channel: Channel,
    pub subject: String,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "job", rename_all = "snake_case")]
pub enum Job {
    /// 会话新消息
    NewMessage {
        message_id: MessageId,
        delivery: Delivery,
    },
    /// 请求相关通知（创建、状态变更）
    RequestStatus {
        request_id: RequestId,
        delivery: Delivery,
    },
    /// 新用户欢迎
    UserWelcome { user_id: UserId, delivery: Delivery },
}

impl Job {
    pub fn name(&self) -> &'static str {
        match self {
            Self::NewMessage { .. } => NEW_MESSAGE,
            Self::RequestStatus { .. } => REQUEST_STATUS,
            Self::UserWelcome { .. } => USER_WELCOME,
        }
    }

    pub fn delivery(&self) -> &Delivery {
        match self {
            Self::NewMessage { delivery, .. }
            | Self::RequestStatus { delivery, .. }
            | Self::UserWelcome { delivery, .. } => delivery,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_is_tagged_by_name() {
        let job = Job::NewMessage {
            message_id: MessageId(5),
            delivery: Delivery {
                recipient_id: UserId(2),
                template: TemplateKey::NewMessage,
                channel: Channel::Email,
                subject: "s".into(),
                body: "b".into(),
            },
        };

        let value = serde_json::to_value(&job).unwrap();
        assert_eq!(value["job"], "new_message");
        assert_eq!(value["message_id"], 5);
        assert_eq!(value["delivery"]["template"], "new-message");
        assert_eq!(job.name(), NEW_MESSAGE);
        assert_eq!(job.delivery().recipient_id, UserId(2));
    }
}
