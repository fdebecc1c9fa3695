//! 服务错误类型
//!
//! 直接沿用共享库的错误分类，保证 API、Worker 与错误上报使用同一套键。

pub use wecarry_shared::error::{AppError, ClientError, ErrorCategory, ErrorKey, Result};
