//! Durable file tier.

use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use gateway_core::{
    Envelope, Tier, TierKind,
    traits::TierError,
};

const SESSION_FILE: &str = "session.json";

/// File tier: one directory per session holding a single encrypted blob.
///
/// Layout: `<root>/<session_name>/session.json`.
pub struct FileTier {
    root: PathBuf,
    enabled: bool,
}

impl FileTier {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
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
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn session_dir(&self, session_name: &str) -> Result<PathBuf, TierError> {
        Ok(self.root.join(checked_dir_name(session_name)?))
    }
}

/// Reject session names that cannot safely be used as a directory name.
pub(crate) fn checked_dir_name(session_name: &str) -> Result<&str, TierError> {
    let valid = !session_name.is_empty()
        && session_name != "."
        && session_name != ".."
        && session_name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(session_name)
    } else {
        Err(TierError::Backend(format!(
            "session name '{session_name}' is not usable as a path"
        )))
    }
}

#[async_trait]
impl Tier for FileTier {
    fn kind(&self) -> TierKind {
        TierKind::File
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    async fn write(&self, session_name: &str, envelope: &Envelope) -> Result<(), TierError> {
        let dir = self.session_dir(session_name)?;
        tokio::fs::create_dir_all(&dir).await?;

        // Each writer renames its own temp file into place.
        let tmp = dir.join(format!("{SESSION_FILE}.{:016x}.tmp", rand::random::<u64>()));
        let written = match tokio::fs::write(&tmp, envelope.to_json()?).await {
            Ok(()) => tokio::fs::rename(&tmp, dir.join(SESSION_FILE)).await,
            Err(e) => Err(e),
        };
        if written.is_err() {
            let _ = tokio::fs::remove_file(&tmp).await;
        }
        written.map_err(TierError::from)
    }

    async fn read(&self, session_name: &str) -> Result<Option<Envelope>, TierError> {
        let path = self.session_dir(session_name)?.join(SESSION_FILE);
        match tokio::fs::read_to_string(&path).await {
            Ok(raw) => Ok(Some(Envelope::from_json(&raw)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, session_name: &str) -> Result<(), TierError> {
        let dir = self.session_dir(session_name)?;
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
