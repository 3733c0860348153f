//! Memory stores and the session-scoped memory manager for memtier.

pub mod file_backend;
pub mod in_memory;
pub mod manager;
pub mod progression;
mod record;

pub use file_backend::FileStore;
pub use in_memory::InMemoryStore;
pub use manager::{GenerateRequest, MemoryManager, MemoryUpdate, SessionScope};
pub use progression::{ProgressionEngine, ProgressionReport};
