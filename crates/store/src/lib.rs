pub mod error;
pub mod memory;
pub mod repository;
pub mod testing;

pub use error::StoreError;
pub use memory::MemoryRepository;
pub use repository::{Repository, StoreStats, TaskCasResult};
