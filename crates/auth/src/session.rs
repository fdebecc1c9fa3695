//! OAuth2 会话
//!
//! 会话以 JSON 形式在登录跳转前后保存，`Session::unmarshal(s.marshal()) == s`。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AuthError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Session {
    #[serde(rename = "AuthURL")]
    pub auth_url: String,
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(rename = "IDToken")]
    pub id_token: String,
}

impl Session {
    pub fn new(auth_url: impl Into<String>) -> Self {
        Self {
            auth_url: auth_url.into(),
            ..Default::default()
        }
    }

    /// 序列化为 JSON 字符串
    pub fn marshal(&self) -> String {
        // 结构体只含字符串和时间字段，序列化不会失败
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn unmarshal(data: &str) -> Result<Self> {
        Ok(serde_json::from_str(data)?)
    }

    pub fn get_auth_url(&self) -> Result<&str> {
        if self.auth_url.is_empty() {
            return Err(AuthError::MissingAuthUrl);
        }
        Ok(&self.auth_url)
    }

    /// access token 是否存在且未过期
    pub fn has_valid_token(&self, now: DateTime<Utc>) -> bool {
        !self.access_token.is_empty() && self.expires_at.is_none_or(|exp| exp > now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sessions() -> Vec<Session> {
        vec![
            Session::default(),
            Session::new("https://login.example.com/authorize?state=abc"),
            Session {
                auth_url: "https://login.example.com/authorize".into(),
                access_token: "at-1".into(),
                refresh_token: "rt-1".into(),
                expires_at: Some(Utc.with_ymd_and_hms(2030, 1, 2, 3, 4, 5).unwrap()),
                id_token: "header.payload.sig".into(),
            },
            Session {
                access_token: "中文 token \" 带引号".into(),
                expires_at: Some(Utc::now()),
                ..Default::default()
            },
        ]
    }

    #[test]
    fn test_marshal_unmarshal_round_trip() {
        for s in sessions() {
            let restored = Session::unmarshal(&s.marshal()).unwrap();
            assert_eq!(restored, s);
        }
    }

    #[test]
    fn test_unmarshal_rejects_garbage() {
        assert!(matches!(
            Session::unmarshal("not json"),
            Err(AuthError::InvalidSession(_))
        ));
    }

    #[test]
    fn test_get_auth_url_requires_value() {
        assert!(matches!(
            Session::default().get_auth_url(),
            Err(AuthError::MissingAuthUrl)
        ));
        assert_eq!(Session::new("https://x").get_auth_url().unwrap(), "https://x");
    }

    #[test]
    fn test_has_valid_token() {
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let mut s = Session::default();
        assert!(!s.has_valid_token(now));

        s.access_token = "t".into();
        assert!(s.has_valid_token(now));

        s.expires_at = Some(Utc.with_ymd_and_hms(2024, 12, 31, 0, 0, 0).unwrap());
        assert!(!s.has_valid_token(now));
    }
}
