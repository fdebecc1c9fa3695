//! WeCarry 核心服务
//!
//! 请求生命周期状态机、会话管理、通知调度与后台 Worker，
//! 以及承载它们的 HTTP API。

pub mod api;
pub mod error;
pub mod events;
pub mod lifecycle;
pub mod models;
pub mod notification;
pub mod repository;
pub mod service;
pub mod thread;
pub mod worker;

pub use error::{AppError, Result};
pub use service::{Core, Repositories, build_worker};
