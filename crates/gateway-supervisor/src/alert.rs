//! Operator alerts for exhausted reconnection.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Raised once per exhaustion episode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    /// Session that could not be reconnected.
    pub session_name: String,
    /// Attempts made before giving up.
    pub attempts: u32,
    /// Human-readable summary.
    pub message: String,
}

impl Alert {
    #[must_use]
    pub fn reconnect_exhausted(session_name: &str, attempts: u32) -> Self {
        Self {
            session_name: session_name.to_string(),
            attempts,
            message: format!(
                "Session '{session_name}' is still disconnected after {attempts} reconnect \
                 attempts; automatic reconnection is suspended until it reconnects or an \
                 operator resumes it"
            ),
        }
    }
}

/// Alert error.
#[derive(Debug, Error)]
pub enum AlertError {
    #[error("Alert channel unavailable")]
    ChannelUnavailable,
    #[error("Alert delivery failed: {0}")]
    DeliveryFailed(String),
}

/// Trait for delivering operator alerts.
///
/// Implement this to route alerts to email, chat, paging, etc.
#[async_trait]
pub trait AlertSink: Send + Sync {
    /// Deliver one alert.
    async fn notify(&self, alert: &Alert) -> Result<(), AlertError>;
}

/// Sink that only writes alerts to the log.
#[derive(Debug, Default, Clone)]
pub struct LogAlertSink;

#[async_trait]
impl AlertSink for LogAlertSink {
    async fn notify(&self, alert: &Alert) -> Result<(), AlertError> {
        tracing::error!(
            session = %alert.session_name,
            attempts = alert.attempts,
            "{}",
            alert.message
        );
        Ok(())
    }
}
