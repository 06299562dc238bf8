//! Store implementations.
//!
//! [`SqliteStore`] keeps messages in a relational table; [`MemoryStore`]
//! holds them in process and is used for tests and embedding.

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
