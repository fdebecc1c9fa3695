//! 数据模型

pub mod enums;
pub mod ids;
pub mod request;
pub mod thread;
pub mod user;

pub use enums::{
    Channel, ContactPreference, RequestKind, RequestSize, RequestStatus, RequestVisibility,
};
pub use ids::{MessageId, RequestId, ThreadId, UserId};
pub use request::{NewRequest, ProviderUpdate, Request, StatusChange, StatusChangeOutcome};
pub use thread::{Message, NewMessage, Thread, ThreadParticipant};
pub use user::{NewUser, User};
