//! In-memory cache and datastore backends.

use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
    time::Duration,
};

use async_trait::async_trait;
use gateway_core::traits::TierError;
use tokio::time::Instant;

use super::{CacheBackend, SessionDatastore, SessionRecord};

/// In-memory cache with per-entry expiry.
///
/// Clones share the same entries. Useful for development and tests;
/// data is lost on restart.
#[derive(Clone, Default)]
pub struct MemoryCache {
    entries: Arc<RwLock<HashMap<String, (String, Instant)>>>,
}

impl MemoryCache {
    /// Create a new in-memory cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, expired ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().map_or(0, |entries| entries.len())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CacheBackend for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, TierError> {
        let entries = self
            .entries
            .read()
            .map_err(|e| TierError::Backend(e.to_string()))?;

        Ok(entries
            .get(key)
            .filter(|(_, expires_at)| Instant::now() < *expires_at)
            .map(|(value, _)| value.clone()))
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), TierError> {
        self.entries
            .write()
            .map_err(|e| TierError::Backend(e.to_string()))?
            .insert(key.to_string(), (value.to_string(), Instant::now() + ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), TierError> {
        self.entries
            .write()
            .map_err(|e| TierError::Backend(e.to_string()))?
            .remove(key);
        Ok(())
    }
}

/// In-memory datastore keeping soft-deleted rows.
///
/// Clones share the same records.
#[derive(Clone, Default)]
pub struct MemoryDatastore {
    records: Arc<RwLock<HashMap<String, SessionRecord>>>,
}

impl MemoryDatastore {
    /// Create a new in-memory datastore.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch a record regardless of its active flag.
    #[must_use]
    pub fn record(&self, session_name: &str) -> Option<SessionRecord> {
        self.records
            .read()
            .ok()
            .and_then(|records| records.get(session_name).cloned())
    }
}

#[async_trait]
impl SessionDatastore for MemoryDatastore {
    async fn upsert(&self, record: SessionRecord) -> Result<(), TierError> {
        self.records
            .write()
            .map_err(|e| TierError::Backend(e.to_string()))?
            .insert(record.session_name.clone(), record);
        Ok(())
    }

    async fn find_active(&self, session_name: &str) -> Result<Option<SessionRecord>, TierError> {
        Ok(self
            .records
            .read()
            .map_err(|e| TierError::Backend(e.to_string()))?
            .get(session_name)
            .filter(|record| record.is_active)
            .cloned())
    }

    async fn deactivate(&self, session_name: &str) -> Result<u64, TierError> {
        let mut records = self
            .records
            .write()
            .map_err(|e| TierError::Backend(e.to_string()))?;

        Ok(records.get_mut(session_name).map_or(0, |record| {
            record.is_active = false;
            1
        }))
    }
}

#[cfg(test)]
mod tests {
    use gateway_core::Envelope;

    use super::*;

    fn record(name: &str) -> SessionRecord {
        SessionRecord {
            session_name: name.to_string(),
            envelope: Envelope {
                ciphertext: "00".to_string(),
                iv: "11".to_string(),
                auth_tag: "22".to_string(),
            },
            is_active: true,
            last_connected: 1,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_entries_expire() {
        let cache = MemoryCache::new();
        cache
            .set_with_ttl("k", "v", Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(cache.get("k").await.unwrap().as_deref(), Some("v"));

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(cache.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_datastore_soft_delete_and_reactivate() {
        let store = MemoryDatastore::new();
        store.upsert(record("support")).await.unwrap();

        assert_eq!(store.deactivate("support").await.unwrap(), 1);
        assert!(store.find_active("support").await.unwrap().is_none());
        assert!(!store.record("support").unwrap().is_active);

        store.upsert(record("support")).await.unwrap();
        assert!(store.find_active("support").await.unwrap().is_some());

        assert_eq!(store.deactivate("unknown").await.unwrap(), 0);
    }
}
