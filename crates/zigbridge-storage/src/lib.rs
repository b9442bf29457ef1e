//! Persistent configuration storage for zigbridge.
//!
//! Implements the core `KvStore` interface on top of redb. Values are
//! bincode-encoded and kept in a single table under `namespace:key` keys.

pub mod error;
pub mod redb_store;

pub use error::{Result, StorageError};
pub use redb_store::RedbStore;
