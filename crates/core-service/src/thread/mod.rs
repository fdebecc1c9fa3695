//! 会话与消息

pub mod manager;

pub use manager::{ThreadManager, ThreadView};
