//! Cache namespaces for offline support.
//!
//! This module provides:
//! - Request identities (method + URL, GET only) hashed into stable keys
//! - Named namespaces of response snapshots, backed by SQLite or memory
//! - Cache-first and network-first strategies over a fetch function

mod layer;
mod storage;
mod types;

pub use layer::CacheLayer;
pub use storage::{CacheStorage, MemoryStorage, SqliteStorage};
pub use types::{CacheResult, CacheSource, RequestKey};

#[cfg(test)]
pub use types::CachedResponse;
