//! 已启用的身份提供方集合

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{AuthError, Result};
use crate::provider::Provider;

#[derive(Default, Clone)]
pub struct Providers {
    providers: HashMap<String, Arc<dyn Provider>>,
}

impl Providers {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册提供方，同名覆盖
    pub fn register(&mut self, provider: Arc<dyn Provider>) {
        self.providers.insert(provider.name().to_string(), provider);
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Provider>> {
        self.providers
            .get(name)
            .cloned()
            .ok_or_else(|| AuthError::UnknownProvider(name.to_string()))
    }

    /// 已注册的提供方名称（排序后）
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.providers.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::azure_adv2::AzureAdV2Provider;

    #[test]
    fn test_register_and_lookup() {
        let mut providers = Providers::new();
        assert!(providers.is_empty());

        let azure = AzureAdV2Provider::from_json(
            r#"{"TenantID":"t","ClientSecret":"c","ApplicationID":"a"}"#,
            "http://localhost/callback",
        )
        .unwrap();
        providers.register(Arc::new(azure));

        assert_eq!(providers.names(), vec!["azureadv2".to_string()]);
        assert!(providers.get("azureadv2").is_ok());
        assert!(matches!(
            providers.get("google"),
            Err(AuthError::UnknownProvider(name)) if name == "google"
        ));
    }
}
