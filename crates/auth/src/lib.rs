//! 身份提供方适配层
//!
//! 每个 OAuth2/OIDC 提供方实现 [`Provider`]：生成授权地址、反序列化会话、用会话换取用户信息。
//! 授权码换 token 的流程不在本 crate 内。

pub mod azure_adv2;
pub mod error;
pub mod provider;
pub mod registry;
pub mod session;

pub use azure_adv2::{AzureAdV2Config, AzureAdV2Provider};
pub use error::{AuthError, Result};
pub use provider::{AuthUser, Provider};
pub use registry::Providers;
pub use session::Session;
