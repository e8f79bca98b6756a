//! Core traits for session tiers and connection providers.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::Envelope;

/// Kind of storage tier, listed fastest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TierKind {
    /// Fast, ephemeral cache.
    Cache,
    /// Durable datastore with soft delete.
    Datastore,
    /// Durable file store.
    File,
}

impl TierKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Cache => "cache",
            Self::Datastore => "datastore",
            Self::File => "file",
        }
    }
}

impl fmt::Display for TierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tier error.
#[derive(Debug, Error)]
pub enum TierError {
    #[error("Tier unavailable: {0}")]
    Unavailable(String),
    #[error("Tier backend error: {0}")]
    Backend(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A single storage backend for session envelopes.
///
/// Tiers only move envelopes; encryption happens in the session store.
#[async_trait]
pub trait Tier: Send + Sync {
    /// Which kind of tier this is.
    fn kind(&self) -> TierKind;

    /// Whether the tier takes part in operations. Resolved at construction.
    fn is_enabled(&self) -> bool {
        true
    }

    /// Write (upsert) the envelope for a session.
    async fn write(&self, session_name: &str, envelope: &Envelope) -> Result<(), TierError>;

    /// Read the live envelope for a session, if any.
    async fn read(&self, session_name: &str) -> Result<Option<Envelope>, TierError>;

    /// Remove the session. Durable datastores soft-delete.
    async fn delete(&self, session_name: &str) -> Result<(), TierError>;
}

/// Connection status reported by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConnectionStatus {
    pub connected: bool,
}

/// Pairing code offered by the provider while not connected.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QrCode {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qr_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base64: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

impl QrCode {
    /// Whether any representation of the code is present.
    #[must_use]
    pub const fn is_present(&self) -> bool {
        self.qr_code.is_some() || self.base64.is_some() || self.image_url.is_some()
    }
}

/// Result of a broadcast send.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastReceipt {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
}

/// Provider error.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Unknown session: {0}")]
    UnknownSession(String),
    #[error("Provider unavailable: {0}")]
    Unavailable(String),
    #[error("Provider request failed: {0}")]
    Request(String),
}

/// Trait for the external messaging client.
///
/// One provider serves every named session.
#[async_trait]
pub trait ConnectionProvider: Send + Sync {
    /// Provision (or attach to) the connection for a session.
    async fn create_instance(&self, session_name: &str) -> Result<(), ProviderError>;

    /// Probe whether the session is connected.
    async fn check_connection_status(
        &self,
        session_name: &str,
    ) -> Result<ConnectionStatus, ProviderError>;

    /// Current pairing code, if one is being offered.
    async fn get_qr_code(&self, session_name: &str) -> Result<Option<QrCode>, ProviderError>;

    /// Re-establish the connection, resuming from persisted state when given.
    async fn initialize(
        &self,
        session_name: &str,
        session: Option<&Value>,
    ) -> Result<(), ProviderError>;

    /// Send one message to many recipients.
    ///
    /// This is the only send primitive; sending as a named account to a
    /// single recipient goes through here with one recipient.
    async fn send_broadcast(
        &self,
        recipients: &[String],
        message: &str,
        session_name: Option<&str>,
    ) -> Result<BroadcastReceipt, ProviderError>;

    /// Export the live session state for persistence.
    ///
    /// Providers that cannot export return `Ok(None)`.
    async fn export_session(&self, _session_name: &str) -> Result<Option<Value>, ProviderError> {
        Ok(None)
    }
}
