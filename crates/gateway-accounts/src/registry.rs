//! Account registry.
//!
//! Tracks named accounts and routes provisioning, status probes and sends
//! through the shared connection provider.

use std::{
    collections::HashMap,
    sync::{Arc, PoisonError, RwLock},
    time::{SystemTime, UNIX_EPOCH},
};

use futures::future::join_all;
use gateway_core::{
    ConnectionProvider,
    traits::{BroadcastReceipt, ProviderError},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Account registry error.
#[derive(Debug, Error)]
pub enum AccountError {
    #[error("Invalid account: {0}")]
    Validation(&'static str),
    #[error("Unknown account: {0}")]
    UnknownAccount(String),
    #[error("Failed to provision account {name}: {source}")]
    Provision {
        name: String,
        #[source]
        source: ProviderError,
    },
    #[error("Status probe failed for {name}: {source}")]
    Probe {
        name: String,
        #[source]
        source: ProviderError,
    },
    #[error("Send via {name} failed: {source}")]
    Send {
        name: String,
        #[source]
        source: ProviderError,
    },
}

/// Descriptive data for one account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountMetadata {
    pub session_name: String,
    pub phone_number: String,
    pub description: Option<String>,
    pub department: Option<String>,
}

/// Live status of one account, recomputed on every request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountStatus {
    pub session_name: String,
    pub phone_number: String,
    pub description: Option<String>,
    pub department: Option<String>,
    pub is_connected: bool,
    #[serde(rename = "hasQRCode")]
    pub has_qr_code: bool,
    /// Probe time, Unix millis.
    pub last_updated: i64,
}

impl AccountStatus {
    fn new(meta: AccountMetadata, is_connected: bool, has_qr_code: bool) -> Self {
        Self {
            session_name: meta.session_name,
            phone_number: meta.phone_number,
            description: meta.description,
            department: meta.department,
            is_connected,
            has_qr_code,
            last_updated: now_millis(),
        }
    }
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

/// Registry of named accounts sharing one provider.
pub struct AccountRegistry {
    provider: Arc<dyn ConnectionProvider>,
    accounts: RwLock<HashMap<String, AccountMetadata>>,
}

impl AccountRegistry {
    #[must_use]
    pub fn new(provider: Arc<dyn ConnectionProvider>) -> Self {
        Self {
            provider,
            accounts: RwLock::new(HashMap::new()),
        }
    }

    fn metadata(&self, session_name: &str) -> Option<AccountMetadata> {
        self.accounts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(session_name)
            .cloned()
    }

    /// Register (or overwrite) an account and provision its connection.
    ///
    /// The initial status probe is best-effort: if it fails the account is
    /// reported as disconnected with no QR code.
    ///
    /// # Errors
    /// Returns error if the name or phone number is empty, or the provider
    /// cannot provision the connection.
    pub async fn add_account(
        &self,
        session_name: &str,
        phone_number: &str,
        description: Option<&str>,
        department: Option<&str>,
    ) -> Result<AccountStatus, AccountError> {
        if session_name.trim().is_empty() {
            return Err(AccountError::Validation("session name is required"));
        }
        if phone_number.trim().is_empty() {
            return Err(AccountError::Validation("phone number is required"));
        }

        let meta = AccountMetadata {
            session_name: session_name.to_string(),
            phone_number: phone_number.to_string(),
            description: description.map(str::to_string),
            department: department.map(str::to_string),
        };
        let replaced = self
            .accounts
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(session_name.to_string(), meta.clone())
            .is_some();

        tracing::info!(
            session = %session_name,
            department = meta.department.as_deref().unwrap_or("-"),
            replaced,
            "Account registered"
        );

        self.provider
            .create_instance(session_name)
            .await
            .map_err(|source| AccountError::Provision {
                name: session_name.to_string(),
                source,
            })?;

        match self.probe(meta.clone()).await {
            Ok(status) => Ok(status),
            Err(e) => {
                tracing::warn!(session = %session_name, error = %e, "Initial status probe failed");
                Ok(AccountStatus::new(meta, false, false))
            }
        }
    }

    /// Live status of one account; `Ok(None)` if the name is unknown.
    ///
    /// # Errors
    /// Returns error if the connection probe fails.
    pub async fn get_account_status(
        &self,
        session_name: &str,
    ) -> Result<Option<AccountStatus>, AccountError> {
        match self.metadata(session_name) {
            Some(meta) => self.probe(meta).await.map(Some),
            None => Ok(None),
        }
    }

    /// Probe every account concurrently, keeping only those that resolved.
    pub async fn get_all_accounts_status(&self) -> Vec<AccountStatus> {
        join_all(self.accounts().into_iter().map(|meta| self.probe(meta)))
            .await
            .into_iter()
            .filter_map(|result| match result {
                Ok(status) => Some(status),
                Err(e) => {
                    tracing::warn!(error = %e, "Dropping unresolved account from status list");
                    None
                }
            })
            .collect()
    }

    async fn probe(&self, meta: AccountMetadata) -> Result<AccountStatus, AccountError> {
        let name = meta.session_name.as_str();
        let is_connected = self
            .provider
            .check_connection_status(name)
            .await
            .map_err(|source| AccountError::Probe {
                name: name.to_string(),
                source,
            })?
            .connected;

        // A failed QR lookup only means no code is on offer.
        let has_qr_code = !is_connected
            && match self.provider.get_qr_code(name).await {
                Ok(qr) => qr.is_some_and(|qr| qr.is_present()),
                Err(e) => {
                    tracing::warn!(session = %name, error = %e, "QR code lookup failed");
                    false
                }
            };

        Ok(AccountStatus::new(meta, is_connected, has_qr_code))
    }

    /// Send one message to one recipient as the named account.
    ///
    /// The provider only exposes a broadcast primitive, so this is a
    /// broadcast with a single recipient. Failures are returned as-is;
    /// nothing is retried here.
    ///
    /// # Errors
    /// Returns error if the account is unknown or the provider send fails.
    pub async fn send_message(
        &self,
        session_name: &str,
        to: &str,
        message: &str,
    ) -> Result<BroadcastReceipt, AccountError> {
        if self.metadata(session_name).is_none() {
            return Err(AccountError::UnknownAccount(session_name.to_string()));
        }

        let receipt = self
            .provider
            .send_broadcast(&[to.to_string()], message, Some(session_name))
            .await
            .map_err(|source| {
                tracing::error!(session = %session_name, error = %source, "Send failed");
                AccountError::Send {
                    name: session_name.to_string(),
                    source,
                }
            })?;

        tracing::debug!(session = %session_name, message_id = ?receipt.message_id, "Message sent");
        Ok(receipt)
    }

    /// Registered accounts, sorted by name.
    #[must_use]
    pub fn accounts(&self) -> Vec<AccountMetadata> {
        let mut accounts: Vec<_> = self
            .accounts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        accounts.sort_by(|a, b| a.session_name.cmp(&b.session_name));
        accounts
    }
}
