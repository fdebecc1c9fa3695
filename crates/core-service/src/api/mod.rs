//! HTTP API
//!
//! 作为核心操作的传输层：路由、请求体校验、调用方身份提取、错误到响应的映射，
//! 以及 TLS / 明文两种监听方式。

pub mod dto;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod server;
pub mod state;

pub use dto::ApiResponse;
pub use error::ApiError;
pub use routes::router;
pub use state::AppState;
