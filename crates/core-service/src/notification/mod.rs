//! 通知：模板、发送渠道与事件调度

pub mod channels;
pub mod dispatcher;
pub mod sender;
pub mod template;

pub use channels::build_senders;
pub use dispatcher::Dispatcher;
pub use sender::{MessageSender, OutboundMessage, SendResult, Senders};
pub use template::{RenderedTemplate, TemplateContext, TemplateKey, TemplateRegistry};
