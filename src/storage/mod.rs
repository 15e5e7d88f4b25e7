//! Storage collaborators: credentials, chat history and block relationships

pub mod memory;
pub mod traits;

pub use memory::{MemoryAuthStore, MemoryBlockStore, MemoryHistoryStore};
pub use traits::{AuthStore, BlockStore, HistoryStore};
