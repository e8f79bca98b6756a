//! In-process stand-in for a messaging client.

use std::{
    collections::HashMap,
    sync::{PoisonError, RwLock},
};

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use gateway_core::{
    ConnectionProvider,
    traits::{BroadcastReceipt, ConnectionStatus, ProviderError, QrCode},
};
use rand::RngCore;
use serde_json::{Value, json};

#[derive(Debug, Default)]
struct Connection {
    connected: bool,
    session: Option<Value>,
    pairing_code: String,
}

/// Simulated provider whose connections can be paired and dropped at will.
#[derive(Debug, Default)]
pub struct SimulatedProvider {
    connections: RwLock<HashMap<String, Connection>>,
}

fn random_token(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    BASE64.encode(bytes)
}

impl SimulatedProvider {
    /// Complete pairing, as if the QR code had been scanned.
    pub fn pair(&self, session_name: &str) {
        let mut connections = self.connections.write().unwrap_or_else(PoisonError::into_inner);
        let connection = connections.entry(session_name.to_string()).or_default();
        connection.connected = true;
        connection.session = Some(json!({
            "token": random_token(24),
            "device": format!("{session_name}-device"),
        }));
    }

    /// Drop the live connection, keeping nothing but the name.
    pub fn drop_connection(&self, session_name: &str) {
        if let Some(connection) = self
            .connections
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(session_name)
        {
            connection.connected = false;
            connection.session = None;
            tracing::warn!(session = %session_name, "Simulated connection drop");
        }
    }

    fn with_connection<T>(
        &self,
        session_name: &str,
        f: impl FnOnce(&mut Connection) -> T,
    ) -> Result<T, ProviderError> {
        self.connections
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(session_name)
            .map(f)
            .ok_or_else(|| ProviderError::UnknownSession(session_name.to_string()))
    }
}

#[async_trait]
impl ConnectionProvider for SimulatedProvider {
    async fn create_instance(&self, session_name: &str) -> Result<(), ProviderError> {
        self.connections
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(session_name.to_string())
            .or_insert_with(|| Connection {
                pairing_code: random_token(12),
                ..Connection::default()
            });
        Ok(())
    }

    async fn check_connection_status(
        &self,
        session_name: &str,
    ) -> Result<ConnectionStatus, ProviderError> {
        self.with_connection(session_name, |c| ConnectionStatus {
            connected: c.connected,
        })
    }

    async fn get_qr_code(&self, session_name: &str) -> Result<Option<QrCode>, ProviderError> {
        self.with_connection(session_name, |c| {
            (!c.connected).then(|| QrCode {
                qr_code: Some(format!("2@{}", c.pairing_code)),
                ..QrCode::default()
            })
        })
    }

    async fn initialize(
        &self,
        session_name: &str,
        session: Option<&Value>,
    ) -> Result<(), ProviderError> {
        self.with_connection(session_name, |c| {
            if let Some(session) = session {
                c.session = Some(session.clone());
                c.connected = true;
            }
        })
    }

    async fn send_broadcast(
        &self,
        recipients: &[String],
        message: &str,
        session_name: Option<&str>,
    ) -> Result<BroadcastReceipt, ProviderError> {
        let name = session_name.ok_or_else(|| ProviderError::Request("no sender".to_string()))?;
        let connected = self.with_connection(name, |c| c.connected)?;
        if !connected {
            return Err(ProviderError::Unavailable(format!("{name} is not connected")));
        }

        tracing::info!(
            session = %name,
            recipients = recipients.len(),
            chars = message.chars().count(),
            "Simulated broadcast"
        );
        Ok(BroadcastReceipt {
            message_id: Some(random_token(9)),
        })
    }

    async fn export_session(&self, session_name: &str) -> Result<Option<Value>, ProviderError> {
        self.with_connection(session_name, |c| {
            if c.connected { c.session.clone() } else { None }
        })
    }
}
