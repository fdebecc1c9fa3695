//! 数据访问层

pub mod memory;
pub mod request_repo;
pub mod thread_repo;
pub mod traits;
pub mod user_repo;

pub use memory::MemoryStore;
pub use request_repo::RequestRepository;
pub use thread_repo::ThreadRepository;
pub use traits::{RequestRepositoryTrait, ThreadRepositoryTrait, UserRepositoryTrait};
pub use user_repo::UserRepository;

#[cfg(test)]
pub use traits::{MockRequestRepositoryTrait, MockThreadRepositoryTrait, MockUserRepositoryTrait};
