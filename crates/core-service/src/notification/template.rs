//! 通知模板
//!
//! 模板键到 `{subject, body}` 的映射，按语言区域注册，缺失时回退到默认语言。
//! 支持 `{{variable}}` 语法，未提供的变量保留原样。
//!
//! ```ignore
//! let registry = TemplateRegistry::with_defaults("en")?;
//! let mut context = TemplateContext::new();
//! context.set("request_title", "Coffee beans");
//! let rendered = registry.render(TemplateKey::NewRequest, "en", &context)?;
//! ```

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use wecarry_shared::config::TemplateOverride;

use crate::error::{AppError, Result};

/// 模板键
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TemplateKey {
    NewMessage,
    NewRequest,
    NewUserWelcome,
    RequestFromOpenToCommitted,
    RequestFromCommittedToAccepted,
    /// 承接者撤回，通知发布者
    RequestOfferWithdrawn,
    /// 发布者拒绝，通知承接者
    RequestOfferRejected,
    RequestFromAcceptedToOpen,
    RequestFromAcceptedToReceived,
    RequestDelivered,
    RequestReceived,
    RequestCompleted,
    RequestRemoved,
}

impl TemplateKey {
    pub const ALL: [TemplateKey; 13] = [
        Self::NewMessage,
        Self::NewRequest,
        Self::NewUserWelcome,
        Self::RequestFromOpenToCommitted,
        Self::RequestFromCommittedToAccepted,
        Self::RequestOfferWithdrawn,
        Self::RequestOfferRejected,
        Self::RequestFromAcceptedToOpen,
        Self::RequestFromAcceptedToReceived,
        Self::RequestDelivered,
        Self::RequestReceived,
        Self::RequestCompleted,
        Self::RequestRemoved,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NewMessage => "new-message",
            Self::NewRequest => "new-request",
            Self::NewUserWelcome => "new-user-welcome",
            Self::RequestFromOpenToCommitted => "request-from-open-to-committed",
            Self::RequestFromCommittedToAccepted => "request-from-committed-to-accepted",
            Self::RequestOfferWithdrawn => "request-offer-withdrawn",
            Self::RequestOfferRejected => "request-offer-rejected",
            Self::RequestFromAcceptedToOpen => "request-from-accepted-to-open",
            Self::RequestFromAcceptedToReceived => "request-from-accepted-to-received",
            Self::RequestDelivered => "request-delivered",
            Self::RequestReceived => "request-received",
            Self::RequestCompleted => "request-completed",
            Self::RequestRemoved => "request-removed",
        }
    }
}

impl fmt::Display for TemplateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TemplateKey {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|key| key.as_str() == s)
            .ok_or_else(|| AppError::Config(format!("未知的模板键: {s}")))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    pub subject: String,
    pub body: String,
}

/// 渲染结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderedTemplate {
    pub subject: String,
    pub body: String,
}

/// 模板变量
#[derive(Debug, Clone, Default)]
pub struct TemplateContext {
    values: HashMap<String, String>,
}

impl TemplateContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.values.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }
}

impl From<HashMap<String, String>> for TemplateContext {
    fn from(values: HashMap<String, String>) -> Self {
        Self { values }
    }
}

/// 模板注册表，启动后只读
pub struct TemplateRegistry {
    default_locale: String,
    templates: HashMap<(TemplateKey, String), Template>,
    variable_regex: Regex,
}

impl TemplateRegistry {
    /// 创建空注册表
    pub fn new(default_locale: impl Into<String>) -> Result<Self> {
        Ok(Self {
            default_locale: normalize_locale(&default_locale.into()),
            templates: HashMap::new(),
            // 匹配 {{variable_name}}，变量名支持字母、数字、下划线
            variable_regex: Regex::new(r"\{\{(\w+)\}\}")
                .map_err(|e| AppError::Config(format!("模板变量正则无效: {e}")))?,
        })
    }

    /// 创建带内置模板的注册表，内置模板注册在默认语言下
    pub fn with_defaults(default_locale: impl Into<String>) -> Result<Self> {
        let mut registry = Self::new(default_locale)?;
        let locale = registry.default_locale.clone();
        for (key, subject, body) in DEFAULT_TEMPLATES {
            registry.register(*key, &locale, *subject, *body);
        }
        Ok(registry)
    }

    pub fn default_locale(&self) -> &str {
        &self.default_locale
    }

    /// 注册模板，同键同语言覆盖
    pub fn register(
        &mut self,
        key: TemplateKey,
        locale: &str,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) {
        self.templates.insert(
            (key, normalize_locale(locale)),
            Template {
                subject: subject.into(),
                body: body.into(),
            },
        );
    }

    /// 应用配置中的模板覆盖，键必须是已知模板键
    pub fn apply_overrides(&mut self, overrides: &HashMap<String, TemplateOverride>) -> Result<()> {
        for (name, template) in overrides {
            let key: TemplateKey = name.parse()?;
            let locale = template
                .locale
                .clone()
                .unwrap_or_else(|| self.default_locale.clone());
            debug!(
                key = %key,
                locale = %locale,
                variables = ?self.extract_variables(&template.body),
                "应用模板覆盖"
            );
            self.register(key, &locale, template.subject.clone(), template.body.clone());
        }
        Ok(())
    }

    /// 查找模板：精确语言 → 主语言（`pt-br` → `pt`）→ 默认语言
    pub fn get(&self, key: TemplateKey, locale: &str) -> Option<&Template> {
        let locale = normalize_locale(locale);
        let language = locale.split('-').next().unwrap_or_default().to_string();

        [locale, language, self.default_locale.clone()]
            .into_iter()
            .find_map(|candidate| self.templates.get(&(key, candidate)))
    }

    /// 校验给定的键都有默认语言模板
    pub fn ensure_registered(&self, keys: &[TemplateKey]) -> Result<()> {
        let missing: Vec<&str> = keys
            .iter()
            .filter(|key| {
                !self
                    .templates
                    .contains_key(&(**key, self.default_locale.clone()))
            })
            .map(|key| key.as_str())
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(AppError::Config(format!(
                "缺少默认语言 {} 的模板: {}",
                self.default_locale,
                missing.join(", ")
            )))
        }
    }

    /// 渲染模板
    pub fn render(
        &self,
        key: TemplateKey,
        locale: &str,
        context: &TemplateContext,
    ) -> Result<RenderedTemplate> {
        let template = self
            .get(key, locale)
            .ok_or_else(|| AppError::Config(format!("模板未注册: {key}")))?;

        Ok(RenderedTemplate {
            subject: self.render_text(&template.subject, context),
            body: self.render_text(&template.body, context),
        })
    }

    /// 替换 `{{variable}}`，未找到的变量保留原样并记录警告日志
    pub fn render_text(&self, template: &str, context: &TemplateContext) -> String {
        self.variable_regex
            .replace_all(template, |caps: &regex::Captures| {
                let var_name = &caps[1];
                match context.get(var_name) {
                    Some(value) => value.to_string(),
                    None => {
                        warn!(variable = var_name, "模板变量未找到，保留原样");
                        caps[0].to_string()
                    }
                }
            })
            .into_owned()
    }

    /// 提取模板中的所有变量名
    pub fn extract_variables(&self, template: &str) -> Vec<String> {
        self.variable_regex
            .captures_iter(template)
            .map(|caps| caps[1].to_string())
            .collect()
    }
}

fn normalize_locale(locale: &str) -> String {
    locale.trim().replace('_', "-").to_ascii_lowercase()
}

const DEFAULT_TEMPLATES: &[(TemplateKey, &str, &str)] = &[
    (
        TemplateKey::NewMessage,
        "New message on WeCarry",
        "Hi {{recipient_nickname}}, {{sender_nickname}} sent you a message about \"{{request_title}}\":\n\n{{message_content}}\n\nReply at {{thread_url}}",
    ),
    (
        TemplateKey::NewRequest,
        "Your request has been posted",
        "Hi {{recipient_nickname}}, your request \"{{request_title}}\" ({{request_origin}} to {{request_destination}}) is now open. View it at {{request_url}}",
    ),
    (
        TemplateKey::NewUserWelcome,
        "Welcome to WeCarry",
        "Hi {{recipient_nickname}}, welcome to WeCarry! Post a request or offer to carry something at {{ui_url}}",
    ),
    (
        TemplateKey::RequestFromOpenToCommitted,
        "Someone offered to carry your request",
        "Hi {{recipient_nickname}}, {{provider_nickname}} offered to carry \"{{request_title}}\". Accept the offer at {{request_url}}",
    ),
    (
        TemplateKey::RequestFromCommittedToAccepted,
        "Your offer was accepted",
        "Hi {{recipient_nickname}}, {{creator_nickname}} accepted your offer to carry \"{{request_title}}\". Details at {{request_url}}",
    ),
    (
        TemplateKey::RequestOfferWithdrawn,
        "An offer was withdrawn",
        "Hi {{recipient_nickname}}, {{provider_nickname}} withdrew their offer to carry \"{{request_title}}\". Your request is open again: {{request_url}}",
    ),
    (
        TemplateKey::RequestOfferRejected,
        "Your offer was declined",
        "Hi {{recipient_nickname}}, {{creator_nickname}} declined your offer to carry \"{{request_title}}\". See other requests at {{ui_url}}",
    ),
    (
        TemplateKey::RequestFromAcceptedToOpen,
        "A request you accepted was reopened",
        "Hi {{recipient_nickname}}, {{creator_nickname}} reopened \"{{request_title}}\" and no longer needs you to carry it. Details at {{request_url}}",
    ),
    (
        TemplateKey::RequestFromAcceptedToReceived,
        "Your delivery was received",
        "Hi {{recipient_nickname}}, {{creator_nickname}} marked \"{{request_title}}\" as received. Thank you for carrying it!",
    ),
    (
        TemplateKey::RequestDelivered,
        "Your request was delivered",
        "Hi {{recipient_nickname}}, {{provider_nickname}} marked \"{{request_title}}\" as delivered. Confirm at {{request_url}}",
    ),
    (
        TemplateKey::RequestReceived,
        "Request received",
        "Hi {{recipient_nickname}}, \"{{request_title}}\" has been received. Details at {{request_url}}",
    ),
    (
        TemplateKey::RequestCompleted,
        "Request completed",
        "Hi {{recipient_nickname}}, {{creator_nickname}} completed \"{{request_title}}\". Thanks for using WeCarry!",
    ),
    (
        TemplateKey::RequestRemoved,
        "A request was removed",
        "Hi {{recipient_nickname}}, {{creator_nickname}} removed \"{{request_title}}\". No further action is needed.",
    ),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_cover_every_key() {
        let registry = TemplateRegistry::with_defaults("en").unwrap();
        registry.ensure_registered(&TemplateKey::ALL).unwrap();
    }

    #[test]
    fn test_missing_template_is_config_error() {
        let mut registry = TemplateRegistry::new("en").unwrap();
        registry.register(TemplateKey::NewMessage, "en", "s", "b");

        let err = registry
            .ensure_registered(&[TemplateKey::NewMessage, TemplateKey::RequestDelivered])
            .unwrap_err();
        assert!(matches!(err, AppError::Config(ref msg) if msg.contains("request-delivered")));
    }

    #[test]
    fn test_key_round_trip() {
        for key in TemplateKey::ALL {
            assert_eq!(key.as_str().parse::<TemplateKey>().unwrap(), key);
        }
        assert!("request-withdrawn".parse::<TemplateKey>().is_err());
        assert_eq!(
            serde_json::to_string(&TemplateKey::RequestFromOpenToCommitted).unwrap(),
            "\"request-from-open-to-committed\""
        );
    }

    #[test]
    fn test_locale_fallback() {
        let mut registry = TemplateRegistry::with_defaults("en").unwrap();
        registry.register(TemplateKey::NewMessage, "pt", "Nova mensagem", "Olá {{recipient_nickname}}");

        let mut context = TemplateContext::new();
        context.set("recipient_nickname", "Ana");

        let pt_br = registry.render(TemplateKey::NewMessage, "pt_BR", &context).unwrap();
        assert_eq!(pt_br.subject, "Nova mensagem");
        assert_eq!(pt_br.body, "Olá Ana");

        let fr = registry.render(TemplateKey::NewMessage, "fr", &context).unwrap();
        assert_eq!(fr.subject, "New message on WeCarry");
    }

    #[test]
    fn test_render_keeps_unknown_variables() {
        let registry = TemplateRegistry::new("en").unwrap();
        let mut context = TemplateContext::new();
        context.set("name", "Ada");

        assert_eq!(
            registry.render_text("{{name}} and {{name}} meet {{other}}", &context),
            "Ada and Ada meet {{other}}"
        );
    }

    #[test]
    fn test_apply_overrides() {
        let mut registry = TemplateRegistry::with_defaults("en").unwrap();
        let mut overrides = HashMap::new();
        overrides.insert(
            "request-delivered".to_string(),
            TemplateOverride {
                locale: None,
                subject: "Delivered!".into(),
                body: "{{request_title}} arrived".into(),
            },
        );
        registry.apply_overrides(&overrides).unwrap();

        let template = registry.get(TemplateKey::RequestDelivered, "en").unwrap();
        assert_eq!(template.subject, "Delivered!");

        overrides.insert(
            "no-such-key".to_string(),
            TemplateOverride {
                locale: None,
                subject: String::new(),
                body: String::new(),
            },
        );
        assert!(matches!(
            registry.apply_overrides(&overrides),
            Err(AppError::Config(_))
        ));
    }

    #[test]
    fn test_extract_variables() {
        let registry = TemplateRegistry::new("en").unwrap();
        let vars = registry.extract_variables("{{a}} {{b_c}} {{a}}");
        assert_eq!(vars, vec!["a", "b_c", "a"]);
    }
}
