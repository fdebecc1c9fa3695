//! 请求生命周期

pub mod state_machine;
pub mod transitions;

pub use state_machine::{StateMachine, TransitionOutcome};
pub use transitions::{Notice, Party, Role};
