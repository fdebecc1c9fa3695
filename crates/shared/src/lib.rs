//! 共享库
//!
//! 包含各 crate 共用的配置、错误分类、数据库连接、重试、可观测性、错误上报和 TLS 等基础设施代码。

pub mod config;
pub mod database;
pub mod error;
pub mod observability;
pub mod reporting;
pub mod retry;
pub mod tls;
