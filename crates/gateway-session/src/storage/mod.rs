//! Tier implementations.

pub mod cache;
pub mod datastore;
pub mod file;

#[cfg(feature = "memory")]
pub mod memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use cache::{CacheBackend, CacheTier};
pub use datastore::{DatastoreTier, SessionDatastore, SessionRecord};
pub use file::FileTier;

#[cfg(feature = "memory")]
pub use memory::{MemoryCache, MemoryDatastore};

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteDatastore;

use std::time::{SystemTime, UNIX_EPOCH};

pub(crate) fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}
