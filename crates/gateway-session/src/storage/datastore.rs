//! Durable datastore tier.

use async_trait::async_trait;
use gateway_core::{
    Envelope, Tier, TierKind,
    traits::TierError,
};
use serde::{Deserialize, Serialize};

use super::now_millis;

/// Persisted session row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    /// Unique session name.
    pub session_name: String,
    /// Encrypted session payload.
    pub envelope: Envelope,
    /// False once soft-deleted.
    pub is_active: bool,
    /// Last successful save (Unix epoch millis).
    pub last_connected: i64,
}

/// Record store backing the datastore tier.
#[async_trait]
pub trait SessionDatastore: Send + Sync {
    /// Insert or replace the record keyed by its session name.
    async fn upsert(&self, record: SessionRecord) -> Result<(), TierError>;

    /// Find the record only if it is active.
    async fn find_active(&self, session_name: &str) -> Result<Option<SessionRecord>, TierError>;

    /// Mark every record for the session inactive. Returns rows touched.
    async fn deactivate(&self, session_name: &str) -> Result<u64, TierError>;
}

/// Datastore tier: upsert on write, soft delete on delete.
pub struct DatastoreTier<D> {
    datastore: D,
    enabled: bool,
}

impl<D: SessionDatastore> DatastoreTier<D> {
    #[must_use]
    pub const fn new(datastore: D) -> Self {
        Self {
            datastore,
            enabled: true,
        }
    }

    /// Turn the tier on or off for the lifetime of the store.
    #[must_use]
    pub const fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    #[must_use]
    pub const fn datastore(&self) -> &D {
        &self.datastore
    }
}

#[async_trait]
impl<D: SessionDatastore> Tier for DatastoreTier<D> {
    fn kind(&self) -> TierKind {
        TierKind::Datastore
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    async fn write(&self, session_name: &str, envelope: &Envelope) -> Result<(), TierError> {
        self.datastore
            .upsert(SessionRecord {
                session_name: session_name.to_string(),
                envelope: envelope.clone(),
                is_active: true,
                last_connected: now_millis(),
            })
            .await
    }

    async fn read(&self, session_name: &str) -> Result<Option<Envelope>, TierError> {
        Ok(self
            .datastore
            .find_active(session_name)
            .await?
            .map(|record| record.envelope))
    }

    async fn delete(&self, session_name: &str) -> Result<(), TierError> {
        let touched = self.datastore.deactivate(session_name).await?;
        tracing::debug!(session = %session_name, touched, "Deactivated session records");
        Ok(())
    }
}
