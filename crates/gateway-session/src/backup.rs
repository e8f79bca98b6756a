//! Timestamped session backups.

use std::{io::ErrorKind, path::PathBuf};

use async_trait::async_trait;
use gateway_core::{Envelope, traits::TierError};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;

use crate::storage::{file::checked_dir_name, now_millis};

/// One stored backup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupEntry {
    pub session_name: String,
    /// Unix epoch millis; unique per session.
    pub created_at: i64,
}

/// Store for encrypted session snapshots.
#[async_trait]
pub trait BackupStore: Send + Sync {
    /// Store a snapshot under a fresh timestamp.
    async fn store(&self, session_name: &str, envelope: &Envelope)
    -> Result<BackupEntry, TierError>;

    /// Backups for a session, newest first.
    async fn list(&self, session_name: &str) -> Result<Vec<BackupEntry>, TierError>;

    /// Read a stored snapshot.
    async fn fetch(&self, entry: &BackupEntry) -> Result<Envelope, TierError>;
}

/// Backups as files: `<root>/<session_name>/<created_at>.json`.
pub struct FileBackupStore {
    root: PathBuf,
    max_backups: usize,
}

impl FileBackupStore {
    /// Keep at most `max_backups` per session (0 keeps everything).
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, max_backups: usize) -> Self {
        Self {
            root: root.into(),
            max_backups,
        }
    }

    fn session_dir(&self, session_name: &str) -> Result<PathBuf, TierError> {
        Ok(self.root.join(checked_dir_name(session_name)?))
    }

    async fn prune(&self, session_name: &str) -> Result<(), TierError> {
        if self.max_backups == 0 {
            return Ok(());
        }
        let dir = self.session_dir(session_name)?;
        for stale in self.list(session_name).await?.iter().skip(self.max_backups) {
            let path = dir.join(format!("{}.json", stale.created_at));
            match tokio::fs::remove_file(&path).await {
                Ok(()) => tracing::debug!(
                    session = %session_name,
                    created_at = stale.created_at,
                    "Pruned backup"
                ),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

#[async_trait]
impl BackupStore for FileBackupStore {
    async fn store(
        &self,
        session_name: &str,
        envelope: &Envelope,
    ) -> Result<BackupEntry, TierError> {
        let dir = self.session_dir(session_name)?;
        tokio::fs::create_dir_all(&dir).await?;

        let contents = envelope.to_json()?;
        // Timestamps only move forward, even after pruning frees older names.
        let latest = self.list(session_name).await?.first().map(|b| b.created_at);
        let mut created_at = latest.map_or_else(now_millis, |latest| now_millis().max(latest + 1));
        loop {
            let path = dir.join(format!("{created_at}.json"));
            let file = tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await;
            match file {
                Ok(mut file) => {
                    file.write_all(contents.as_bytes()).await?;
                    file.flush().await?;
                    break;
                }
                // Two backups within the same millisecond
                Err(e) if e.kind() == ErrorKind::AlreadyExists => created_at += 1,
                Err(e) => return Err(e.into()),
            }
        }

        if let Err(e) = self.prune(session_name).await {
            tracing::warn!(session = %session_name, error = %e, "Backup pruning failed");
        }

        Ok(BackupEntry {
            session_name: session_name.to_string(),
            created_at,
        })
    }

    async fn list(&self, session_name: &str) -> Result<Vec<BackupEntry>, TierError> {
        let dir = self.session_dir(session_name)?;
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut backups = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let created_at = name
                .to_str()
                .and_then(|n| n.strip_suffix(".json"))
                .and_then(|stamp| stamp.parse::<i64>().ok());
            if let Some(created_at) = created_at {
                backups.push(BackupEntry {
                    session_name: session_name.to_string(),
                    created_at,
                });
            }
        }

        backups.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(backups)
    }

    async fn fetch(&self, entry: &BackupEntry) -> Result<Envelope, TierError> {
        let path = self
            .session_dir(&entry.session_name)?
            .join(format!("{}.json", entry.created_at));
        let raw = tokio::fs::read_to_string(&path).await?;
        Ok(Envelope::from_json(&raw)?)
    }
}
