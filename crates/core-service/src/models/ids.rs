//! 强类型 ID
//!
//! 用户、请求、会话、消息的 ID 在编译期区分，数据库中均为 BIGINT。

use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! typed_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
            sqlx::Type,
        )]
        #[serde(transparent)]
        #[sqlx(transparent)]
        pub struct $name(pub i64);

        impl $name {
            pub fn value(self) -> i64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(value: i64) -> Self {
                Self(value)
            }
        }
    };
}

typed_id!(
    /// 用户 ID
    UserId
);
typed_id!(
    /// 请求 ID
    RequestId
);
typed_id!(
    /// 会话 ID
    ThreadId
);
typed_id!(
    /// 消息 ID
    MessageId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_serialize_as_plain_numbers() {
        assert_eq!(serde_json::to_string(&UserId(7)).unwrap(), "7");
        let id: RequestId = serde_json::from_str("42").unwrap();
        assert_eq!(id, RequestId(42));
        assert_eq!(ThreadId::from(3).to_string(), "3");
    }
}
