//! Gateway daemon over a simulated provider.
//!
//! Run with: cargo run -p gateway-daemon
//!
//! Set `GATEWAY_ENCRYPTION_KEY` (or `GATEWAY_EPHEMERAL_KEY=1` for a throwaway
//! key). One department connection is dropped periodically to exercise the
//! reconnect path.

mod provider;

use std::{sync::Arc, time::Duration};

use gateway_accounts::AccountRegistry;
use gateway_core::{ConnectionProvider, CryptoBox, GatewayConfig, Tier, TierConfig};
use gateway_session::{
    FileBackupStore, SessionStore,
    storage::{CacheTier, DatastoreTier, FileTier, MemoryCache, MemoryDatastore},
};
use gateway_supervisor::{AlertSink, HealthMonitor, LogAlertSink};
use serde_json::Value;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::provider::SimulatedProvider;

const DEPARTMENTS: &[(&str, &str, &str)] = &[
    ("sales", "+390000000001", "Sales desk"),
    ("support", "+390000000002", "Customer support"),
    ("billing", "+390000000003", "Billing office"),
];

const OUTAGE_EVERY: Duration = Duration::from_secs(120);

fn build_store(crypto: CryptoBox, config: &TierConfig) -> SessionStore {
    let tiers: Vec<Arc<dyn Tier>> = vec![
        Arc::new(CacheTier::new(MemoryCache::new(), config.cache_ttl).enabled(config.cache_enabled)),
        Arc::new(DatastoreTier::new(MemoryDatastore::new()).enabled(config.datastore_enabled)),
        Arc::new(FileTier::new(&config.session_dir).enabled(config.file_enabled)),
    ];
    SessionStore::new(crypto, tiers).with_backups(Arc::new(FileBackupStore::new(
        &config.backup_dir,
        config.max_backups,
    )))
}

/// Save a freshly paired session, warning when no tier accepted it.
async fn persist_paired(store: &SessionStore, name: &str, session: &Value) -> bool {
    let saved = store.save_session(name, session).await;
    if !saved {
        tracing::warn!(session = %name, "Paired session could not be persisted");
    }
    saved
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = GatewayConfig::from_env()?;
    let crypto = CryptoBox::from_config(&config.crypto)?;
    let store = Arc::new(build_store(crypto, &config.tiers));

    let provider = Arc::new(SimulatedProvider::default());
    let shared: Arc<dyn ConnectionProvider> = provider.clone();
    let registry = AccountRegistry::new(Arc::clone(&shared));
    let alerts: Arc<dyn AlertSink> = Arc::new(LogAlertSink);

    let mut monitors = Vec::with_capacity(DEPARTMENTS.len());
    for &(name, phone, description) in DEPARTMENTS {
        let status = registry
            .add_account(name, phone, Some(description), Some(name))
            .await?;

        if let Some(session) = store.load_session(name).await {
            shared.initialize(name, Some(&session)).await?;
            tracing::info!(session = %name, "Resumed stored session");
        } else if status.has_qr_code {
            provider.pair(name);
            if let Some(session) = shared.export_session(name).await? {
                persist_paired(&store, name, &session).await;
            }
        }

        let monitor = HealthMonitor::new(
            name,
            Arc::clone(&shared),
            Arc::clone(&store),
            Arc::clone(&alerts),
            config.monitor.clone(),
        );
        monitor.start_default();
        monitors.push(monitor);
    }

    for status in registry.get_all_accounts_status().await {
        tracing::info!(
            session = %status.session_name,
            connected = status.is_connected,
            qr = status.has_qr_code,
            "Account ready"
        );
    }

    match registry
        .send_message("sales", "+390000009999", "Gateway online")
        .await
    {
        Ok(receipt) => tracing::info!(message_id = ?receipt.message_id, "Test message sent"),
        Err(e) => tracing::warn!(error = %e, "Test message failed"),
    }

    let outages = {
        let provider = Arc::clone(&provider);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(OUTAGE_EVERY);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                provider.drop_connection("support");
            }
        })
    };

    tracing::info!("Gateway running; press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;

    outages.abort();
    for monitor in &monitors {
        let snapshot = monitor.snapshot();
        tracing::info!(
            session = %snapshot.session_name,
            phase = ?snapshot.phase,
            healthy_checks = snapshot.healthy_checks,
            alerts = snapshot.alerts_sent,
            "Stopping monitor"
        );
        monitor.stop().await;
    }
    Ok(())
}
