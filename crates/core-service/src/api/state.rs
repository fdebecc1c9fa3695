//! 应用状态定义

use std::sync::Arc;

use wecarry_auth::Providers;

use crate::service::Core;

/// Axum 应用共享状态
#[derive(Clone)]
pub struct AppState {
    pub core: Arc<Core>,
    /// 已启用的身份提供方
    pub providers: Arc<Providers>,
    /// 新用户未指定语言时使用
    pub default_locale: Arc<str>,
}

impl AppState {
    pub fn new(core: Arc<Core>, providers: Providers, default_locale: &str) -> Self {
        Self {
            core,
            providers: Arc::new(providers),
            default_locale: Arc::from(default_locale),
        }
    }
}
