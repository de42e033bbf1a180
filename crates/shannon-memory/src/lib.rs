//! # shannon-memory
//!
//! Cross-session key/value memory: a SQLite-backed store whose export is
//! woven into every system prompt, plus the memory tools exposed to the LLM.

pub mod store;
pub mod tools;

pub use store::{MemoryEntry, MemoryStore};
pub use tools::{MemoryDeleteTool, MemoryGetTool, MemorySetTool};
