//! Bounded per-user conversation history

pub mod memory;
pub mod sqlite;
pub mod store;
pub mod types;

pub use memory::MemoryHistoryStore;
pub use sqlite::{HistoryStoreOptions, SqliteHistoryStore, IN_MEMORY_PATH};
pub use store::HistoryStore;
pub use types::{DayBoundary, HistoryEntry, HistoryStats, Role, UserInfo};
