//! Session store orchestrating encrypted reads and writes across tiers.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
};

use gateway_core::{
    CryptoBox, CryptoError, Envelope, Tier, TierKind,
    traits::TierError,
};
use serde_json::Value;
use tokio::{sync::Mutex as AsyncMutex, task::JoinSet};

use crate::{
    backup::{BackupEntry, BackupStore},
    report::{AcceptancePolicy, TierOutcome, TierReport},
};

/// Session store error.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("No backup store configured")]
    NoBackupStore,
    #[error("Backup of {0} could not be decrypted")]
    Undecryptable(String),
    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),
    #[error("Storage error: {0}")]
    Tier(#[from] TierError),
}

/// Per-session write lock guarding the session's write generation.
///
/// Saves and deletes bump the generation while holding the lock; a read
/// repair only writes if the generation still matches the one its read saw.
type WriteGuard = Arc<AsyncMutex<u64>>;

/// Multi-tier session store.
///
/// Tiers are consulted in the order given, which must be fastest first.
/// Saves go to every enabled tier independently; loads stop at the first
/// tier holding a decryptable envelope and backfill the tiers above it in
/// the background. A backfill never overwrites a save or delete issued
/// after the read that found the envelope.
pub struct SessionStore {
    crypto: CryptoBox,
    tiers: Vec<Arc<dyn Tier>>,
    backups: Option<Arc<dyn BackupStore>>,
    policy: AcceptancePolicy,
    writes: Mutex<HashMap<String, WriteGuard>>,
    repairs: Mutex<JoinSet<()>>,
}

impl SessionStore {
    /// Create a store over `tiers`, highest priority first.
    #[must_use]
    pub fn new(crypto: CryptoBox, tiers: Vec<Arc<dyn Tier>>) -> Self {
        for tier in &tiers {
            if !tier.is_enabled() {
                tracing::warn!(
                    tier = %tier.kind(),
                    "Session tier disabled; continuing without it"
                );
            }
        }
        Self {
            crypto,
            tiers,
            backups: None,
            policy: AcceptancePolicy::default(),
            writes: Mutex::new(HashMap::new()),
            repairs: Mutex::new(JoinSet::new()),
        }
    }

    /// Attach a backup store.
    #[must_use]
    pub fn with_backups(mut self, backups: Arc<dyn BackupStore>) -> Self {
        self.backups = Some(backups);
        self
    }

    /// Set how many tier writes a save needs to count as successful.
    #[must_use]
    pub fn with_policy(mut self, policy: AcceptancePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Kinds of the enabled tiers, in priority order.
    #[must_use]
    pub fn enabled_tiers(&self) -> Vec<TierKind> {
        self.enabled().map(|tier| tier.kind()).collect()
    }

    fn enabled(&self) -> impl Iterator<Item = &Arc<dyn Tier>> {
        self.tiers.iter().filter(|tier| tier.is_enabled())
    }

    fn write_guard(&self, session_name: &str) -> WriteGuard {
        let mut writes = self.writes.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(writes.entry(session_name.to_string()).or_default())
    }

    /// Encrypt once and write to every enabled tier.
    ///
    /// Returns whether the outcome satisfies the store's acceptance policy
    /// (by default: at least one tier succeeded).
    pub async fn save_session(&self, session_name: &str, data: &Value) -> bool {
        self.save_session_report(session_name, data)
            .await
            .accepted_by(&self.policy)
    }

    /// Encrypt once and write to every enabled tier, reporting each outcome.
    pub async fn save_session_report(&self, session_name: &str, data: &Value) -> TierReport {
        match self.crypto.encrypt(data) {
            Ok(envelope) => self.write_envelope(session_name, &envelope).await,
            Err(e) => {
                tracing::error!(session = %session_name, error = %e, "Session encryption failed");
                let mut report = TierReport::default();
                for tier in &self.tiers {
                    let outcome = if tier.is_enabled() {
                        TierOutcome::Failure(e.to_string())
                    } else {
                        TierOutcome::Skipped
                    };
                    report.record(tier.kind(), outcome);
                }
                report
            }
        }
    }

    async fn write_envelope(&self, session_name: &str, envelope: &Envelope) -> TierReport {
        let guard = self.write_guard(session_name);
        let mut generation = guard.lock().await;
        *generation += 1;

        let mut report = TierReport::default();

        for tier in &self.tiers {
            if !tier.is_enabled() {
                report.record(tier.kind(), TierOutcome::Skipped);
                continue;
            }
            let outcome = match tier.write(session_name, envelope).await {
                Ok(()) => {
                    tracing::debug!(session = %session_name, tier = %tier.kind(), "Session written");
                    TierOutcome::Success
                }
                Err(e) => {
                    tracing::warn!(
                        session = %session_name,
                        tier = %tier.kind(),
                        error = %e,
                        "Session write failed"
                    );
                    TierOutcome::Failure(e.to_string())
                }
            };
            report.record(tier.kind(), outcome);
        }
        drop(generation);

        if report.any_succeeded() {
            tracing::info!(
                session = %session_name,
                succeeded = ?report.succeeded(),
                failed = ?report.failed(),
                "Session saved"
            );
        } else {
            tracing::error!(
                session = %session_name,
                failed = ?report.failed(),
                "Session could not be saved to any tier"
            );
        }
        report
    }

    /// Load the session from the highest-priority tier that has it.
    ///
    /// Read errors and undecryptable envelopes fall through to the next
    /// tier. A hit below the top tier is copied up to the enabled tiers
    /// above it without delaying the return.
    pub async fn load_session(&self, session_name: &str) -> Option<Value> {
        let guard = self.write_guard(session_name);
        let seen = *guard.lock().await;

        for (index, tier) in self.tiers.iter().enumerate() {
            if !tier.is_enabled() {
                continue;
            }
            match tier.read(session_name).await {
                Ok(Some(envelope)) => {
                    if let Some(value) = self.crypto.decrypt::<Value>(&envelope) {
                        tracing::debug!(session = %session_name, tier = %tier.kind(), "Session loaded");
                        self.spawn_read_repair(session_name, index, envelope, guard, seen);
                        return Some(value);
                    }
                    tracing::warn!(
                        session = %session_name,
                        tier = %tier.kind(),
                        "Stored session is unreadable; trying next tier"
                    );
                }
                Ok(None) => {
                    tracing::debug!(session = %session_name, tier = %tier.kind(), "Session not in tier");
                }
                Err(e) => {
                    tracing::warn!(
                        session = %session_name,
                        tier = %tier.kind(),
                        error = %e,
                        "Session read failed; trying next tier"
                    );
                }
            }
        }

        tracing::debug!(session = %session_name, "No stored session found");
        None
    }

    fn spawn_read_repair(
        &self,
        session_name: &str,
        found_at: usize,
        envelope: Envelope,
        guard: WriteGuard,
        seen: u64,
    ) {
        let targets: Vec<Arc<dyn Tier>> = self.tiers[..found_at]
            .iter()
            .filter(|tier| tier.is_enabled())
            .cloned()
            .collect();
        if targets.is_empty() {
            return;
        }

        let session_name = session_name.to_string();
        let mut repairs = self.repairs.lock().unwrap_or_else(PoisonError::into_inner);
        while repairs.try_join_next().is_some() {}
        repairs.spawn(async move {
            let generation = guard.lock().await;
            if *generation != seen {
                tracing::debug!(
                    session = %session_name,
                    "Session changed since it was read; skipping backfill"
                );
                return;
            }
            for tier in targets {
                match tier.write(&session_name, &envelope).await {
                    Ok(()) => tracing::info!(
                        session = %session_name,
                        tier = %tier.kind(),
                        "Backfilled session into higher tier"
                    ),
                    Err(e) => tracing::warn!(
                        session = %session_name,
                        tier = %tier.kind(),
                        error = %e,
                        "Session backfill failed"
                    ),
                }
            }
            drop(generation);
        });
    }

    /// Wait for in-flight read repairs to finish.
    pub async fn flush_repairs(&self) {
        let mut pending = {
            let mut repairs = self.repairs.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::take(&mut *repairs)
        };
        while let Some(result) = pending.join_next().await {
            if let Err(e) = result {
                tracing::warn!(error = %e, "Session backfill task failed");
            }
        }
    }

    /// Delete the session from every enabled tier.
    ///
    /// Cache and file tiers remove the data; the datastore soft-deletes.
    /// Failures are logged and reported, never raised.
    pub async fn delete_session(&self, session_name: &str) -> TierReport {
        let guard = self.write_guard(session_name);
        let mut generation = guard.lock().await;
        *generation += 1;

        let mut report = TierReport::default();

        for tier in &self.tiers {
            if !tier.is_enabled() {
                report.record(tier.kind(), TierOutcome::Skipped);
                continue;
            }
            let outcome = match tier.delete(session_name).await {
                Ok(()) => TierOutcome::Success,
                Err(e) => {
                    tracing::warn!(
                        session = %session_name,
                        tier = %tier.kind(),
                        error = %e,
                        "Session delete failed"
                    );
                    TierOutcome::Failure(e.to_string())
                }
            };
            report.record(tier.kind(), outcome);
        }
        drop(generation);

        tracing::info!(
            session = %session_name,
            deleted = ?report.succeeded(),
            failed = ?report.failed(),
            "Session deleted"
        );
        report
    }

    /// Whether a decryptable session exists in any tier.
    pub async fn has_valid_session(&self, session_name: &str) -> bool {
        self.load_session(session_name).await.is_some()
    }

    /// Snapshot the current session into the backup store.
    ///
    /// Returns `Ok(None)` when there is no session to back up.
    ///
    /// # Errors
    /// Returns error if no backup store is configured or the write fails.
    pub async fn backup_session(
        &self,
        session_name: &str,
    ) -> Result<Option<BackupEntry>, StoreError> {
        let backups = self.backups.as_ref().ok_or(StoreError::NoBackupStore)?;
        let Some(session) = self.load_session(session_name).await else {
            tracing::debug!(session = %session_name, "No session to back up");
            return Ok(None);
        };

        let envelope = self.crypto.encrypt(&session)?;
        let entry = backups.store(session_name, &envelope).await?;
        tracing::info!(session = %session_name, created_at = entry.created_at, "Session backed up");
        Ok(Some(entry))
    }

    /// Backups for a session, newest first.
    ///
    /// # Errors
    /// Returns error if no backup store is configured or listing fails.
    pub async fn list_backups(&self, session_name: &str) -> Result<Vec<BackupEntry>, StoreError> {
        let backups = self.backups.as_ref().ok_or(StoreError::NoBackupStore)?;
        Ok(backups.list(session_name).await?)
    }

    /// Decrypt a backup and save it through every enabled tier.
    ///
    /// # Errors
    /// Returns error if the backup cannot be read or decrypted.
    pub async fn restore_backup(&self, entry: &BackupEntry) -> Result<TierReport, StoreError> {
        let backups = self.backups.as_ref().ok_or(StoreError::NoBackupStore)?;
        let envelope = backups.fetch(entry).await?;
        let session: Value = self
            .crypto
            .decrypt(&envelope)
            .ok_or_else(|| StoreError::Undecryptable(entry.session_name.clone()))?;

        tracing::info!(
            session = %entry.session_name,
            created_at = entry.created_at,
            "Restoring session from backup"
        );
        Ok(self.save_session_report(&entry.session_name, &session).await)
    }
}
