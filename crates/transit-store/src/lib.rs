//! # transit-store
//!
//! Key-value storage backends for the transit engine.
//!
//! The engine only needs `get` / `put` / `delete` / `list` over opaque bytes,
//! expressed by the [`Storage`] trait. Two implementations ship here:
//!
//! - [`MemoryStorage`]: volatile, for tests and embedding.
//! - [`SqliteStorage`]: durable, rusqlite in WAL mode with a versioned
//!   schema, driven from async code via `spawn_blocking`.

pub mod error;
pub mod memory;
pub mod sqlite;
pub mod storage;

pub use error::{StoreError, StoreResult};
pub use memory::MemoryStorage;
pub use sqlite::SqliteStorage;
pub use storage::Storage;
