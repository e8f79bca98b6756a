//! Fast cache tier.

use std::time::Duration;

use async_trait::async_trait;
use gateway_core::{
    Envelope, Tier, TierKind,
    traits::TierError,
};

/// Default key prefix for cached sessions.
pub const DEFAULT_KEY_PREFIX: &str = "gateway:session:";

/// Key/value cache with expiry (Redis-like).
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, TierError>;

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), TierError>;

    async fn delete(&self, key: &str) -> Result<(), TierError>;
}

/// Cache tier storing envelopes as JSON strings with a TTL.
pub struct CacheTier<C> {
    backend: C,
    ttl: Duration,
    prefix: String,
    enabled: bool,
}

impl<C: CacheBackend> CacheTier<C> {
    #[must_use]
    pub fn new(backend: C, ttl: Duration) -> Self {
        Self {
            backend,
            ttl,
            prefix: DEFAULT_KEY_PREFIX.to_string(),
            enabled: true,
        }
    }

    /// Turn the tier on or off for the lifetime of the store.
    #[must_use]
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    #[must_use]
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    fn key(&self, session_name: &str) -> String {
        format!("{}{session_name}", self.prefix)
    }
}

#[async_trait]
impl<C: CacheBackend> Tier for CacheTier<C> {
    fn kind(&self) -> TierKind {
        TierKind::Cache
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    async fn write(&self, session_name: &str, envelope: &Envelope) -> Result<(), TierError> {
        let value = envelope.to_json()?;
        self.backend
            .set_with_ttl(&self.key(session_name), &value, self.ttl)
            .await
    }

    async fn read(&self, session_name: &str) -> Result<Option<Envelope>, TierError> {
        match self.backend.get(&self.key(session_name)).await? {
            Some(raw) => Ok(Some(Envelope::from_json(&raw)?)),
            None => Ok(None),
        }
    }

    async fn delete(&self, session_name: &str) -> Result<(), TierError> {
        self.backend.delete(&self.key(session_name)).await
    }
}
