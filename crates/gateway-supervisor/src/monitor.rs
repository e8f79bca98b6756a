//! Per-connection health monitor.
//!
//! One monitor owns one connection's reconnect state:
//!
//! ```text
//! Idle --start--> Monitoring --disconnected--> Reconnecting --recovered--> Monitoring
//!                     ^                             |
//!                     |                     attempts exhausted
//!                     +---- connected ---------  Alerted
//! ```
//!
//! Ticks, reconnect attempts, grace waits and backoff delays all run in a
//! single task guarded by one cancellation token, so `stop` halts every
//! piece of scheduled work at once.

use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use gateway_core::{ConnectionProvider, MonitorConfig};
use gateway_session::SessionStore;
use serde::Serialize;
use tokio::{
    sync::{Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard},
    task::JoinHandle,
    time::{Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use crate::alert::{Alert, AlertSink};

/// Monitor state machine phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorPhase {
    /// Not running.
    Idle,
    /// Polling; last check was healthy.
    Monitoring,
    /// Working through reconnect attempts.
    Reconnecting,
    /// Attempts exhausted; waiting for a healthy check or `resume`.
    Alerted,
}

/// Result of one reconnect attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectOutcome {
    /// Connection is back.
    Recovered,
    /// Still down; try again after the delay.
    Retry(Duration),
    /// No attempts left; automatic reconnection is suspended.
    Exhausted,
}

/// Point-in-time view of a monitor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthSnapshot {
    pub session_name: String,
    pub phase: MonitorPhase,
    pub reconnect_attempts: u32,
    pub max_reconnect_attempts: u32,
    pub alerts_sent: u64,
    pub healthy_checks: u64,
    pub is_running: bool,
}

#[derive(Debug)]
struct MonitorState {
    phase: MonitorPhase,
    reconnect_attempts: u32,
    alerts_sent: u64,
    healthy_checks: u64,
}

struct Inner {
    session_name: String,
    provider: Arc<dyn ConnectionProvider>,
    store: Arc<SessionStore>,
    alerts: Arc<dyn AlertSink>,
    config: MonitorConfig,
    state: Mutex<MonitorState>,
    /// Held for the whole of each health check.
    busy: AsyncMutex<()>,
}

struct Running {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Health monitor for one named connection.
pub struct HealthMonitor {
    inner: Arc<Inner>,
    running: Mutex<Option<Running>>,
}

impl HealthMonitor {
    /// Create an idle monitor.
    #[must_use]
    pub fn new(
        session_name: impl Into<String>,
        provider: Arc<dyn ConnectionProvider>,
        store: Arc<SessionStore>,
        alerts: Arc<dyn AlertSink>,
        config: MonitorConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                session_name: session_name.into(),
                provider,
                store,
                alerts,
                config,
                state: Mutex::new(MonitorState {
                    phase: MonitorPhase::Idle,
                    reconnect_attempts: 0,
                    alerts_sent: 0,
                    healthy_checks: 0,
                }),
                busy: AsyncMutex::new(()),
            }),
            running: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn session_name(&self) -> &str {
        &self.inner.session_name
    }

    fn running(&self) -> MutexGuard<'_, Option<Running>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start polling every `interval`.
    ///
    /// Returns `false` (and changes nothing) if already running.
    pub fn start(&self, interval: Duration) -> bool {
        let mut running = self.running();
        if running.as_ref().is_some_and(|r| !r.handle.is_finished()) {
            tracing::warn!(
                session = %self.inner.session_name,
                "Health monitor already running; ignoring start"
            );
            return false;
        }

        {
            let mut state = self.inner.state();
            state.phase = if state.reconnect_attempts >= self.inner.config.max_reconnect_attempts
                && state.alerts_sent > 0
            {
                MonitorPhase::Alerted
            } else {
                MonitorPhase::Monitoring
            };
        }

        let token = CancellationToken::new();
        let handle = tokio::spawn(Arc::clone(&self.inner).run(interval, token.clone()));
        *running = Some(Running { token, handle });

        tracing::info!(
            session = %self.inner.session_name,
            interval_secs = interval.as_secs_f64(),
            "Health monitor started"
        );
        true
    }

    /// Start polling at the configured interval.
    pub fn start_default(&self) -> bool {
        self.start(self.inner.config.check_interval)
    }

    /// Stop polling and cancel any pending reconnect or backoff.
    pub async fn stop(&self) {
        let Some(Running { token, handle }) = self.running().take() else {
            return;
        };
        token.cancel();
        if let Err(e) = handle.await {
            if !e.is_cancelled() {
                tracing::warn!(session = %self.inner.session_name, error = %e, "Health monitor task failed");
            }
        }
        self.inner.state().phase = MonitorPhase::Idle;
        tracing::info!(session = %self.inner.session_name, "Health monitor stopped");
    }

    /// Whether the polling task is alive.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running()
            .as_ref()
            .is_some_and(|r| !r.handle.is_finished())
    }

    /// Clear the attempt counter and leave the alerted state.
    ///
    /// This is the operator action that re-enables automatic reconnection.
    pub fn resume(&self) {
        let running = self.is_running();
        let mut state = self.inner.state();
        state.reconnect_attempts = 0;
        state.phase = if running {
            MonitorPhase::Monitoring
        } else {
            MonitorPhase::Idle
        };
        drop(state);
        tracing::info!(session = %self.inner.session_name, "Automatic reconnection resumed by operator");
    }

    /// Run one health check now.
    ///
    /// Only for a monitor that is not polling: returns `false` without
    /// probing while the polling task runs or another manual check is busy.
    pub async fn check_health(&self) -> bool {
        let Some(_busy) = self.manual_slot() else {
            return false;
        };
        self.inner.check_health().await;
        true
    }

    /// Make one reconnect attempt now.
    ///
    /// Returns `None` while the polling task runs or another manual check
    /// is busy, so one counter never has two reconnect loops.
    pub async fn attempt_reconnect(&self) -> Option<ReconnectOutcome> {
        let _busy = self.manual_slot()?;
        Some(self.inner.attempt_reconnect().await)
    }

    fn manual_slot(&self) -> Option<AsyncMutexGuard<'_, ()>> {
        if self.is_running() {
            tracing::warn!(
                session = %self.inner.session_name,
                "Health monitor is polling; ignoring manual check"
            );
            return None;
        }
        let slot = self.inner.busy.try_lock().ok();
        if slot.is_none() {
            tracing::warn!(
                session = %self.inner.session_name,
                "Health check already in progress; ignoring manual check"
            );
        }
        slot
    }

    /// Export the live session from the provider and save it.
    pub async fn save_now(&self) -> bool {
        self.inner.autosave().await
    }

    #[must_use]
    pub fn snapshot(&self) -> HealthSnapshot {
        let is_running = self.is_running();
        let state = self.inner.state();
        HealthSnapshot {
            session_name: self.inner.session_name.clone(),
            phase: state.phase,
            reconnect_attempts: state.reconnect_attempts,
            max_reconnect_attempts: self.inner.config.max_reconnect_attempts,
            alerts_sent: state.alerts_sent,
            healthy_checks: state.healthy_checks,
            is_running,
        }
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        if let Some(running) = self.running().take() {
            running.token.cancel();
        }
    }
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, MonitorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn run(self: Arc<Self>, period: Duration, token: CancellationToken) {
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                () = token.cancelled() => return,
                _ = ticker.tick() => {}
            }
            tokio::select! {
                biased;
                () = token.cancelled() => return,
                () = async {
                    let _busy = self.busy.lock().await;
                    self.check_health().await;
                } => {}
            }
        }
    }

    async fn probe(&self) -> bool {
        match self
            .provider
            .check_connection_status(&self.session_name)
            .await
        {
            Ok(status) => status.connected,
            Err(e) => {
                tracing::warn!(session = %self.session_name, error = %e, "Connection probe failed");
                false
            }
        }
    }

    async fn check_health(&self) {
        if self.probe().await {
            self.on_healthy().await;
            return;
        }

        if self.state().phase == MonitorPhase::Alerted {
            tracing::debug!(
                session = %self.session_name,
                "Still disconnected; automatic reconnection suspended"
            );
            return;
        }

        tracing::warn!(session = %self.session_name, "Connection lost; reconnecting");
        loop {
            match self.attempt_reconnect().await {
                ReconnectOutcome::Recovered | ReconnectOutcome::Exhausted => return,
                ReconnectOutcome::Retry(delay) => {
                    tracing::info!(
                        session = %self.session_name,
                        delay_secs = delay.as_secs(),
                        "Reconnect failed; backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn on_healthy(&self) {
        let (previous_attempts, was_alerted, checks) = {
            let mut state = self.state();
            let previous_attempts = std::mem::take(&mut state.reconnect_attempts);
            let was_alerted = state.phase == MonitorPhase::Alerted;
            state.phase = MonitorPhase::Monitoring;
            state.healthy_checks += 1;
            (previous_attempts, was_alerted, state.healthy_checks)
        };

        if was_alerted {
            tracing::info!(session = %self.session_name, "Connection restored; automatic reconnection re-enabled");
        } else if previous_attempts > 0 {
            tracing::info!(
                session = %self.session_name,
                attempts = previous_attempts,
                "Connection recovered"
            );
        }

        if is_due(checks, self.config.autosave_every_ticks) {
            self.autosave().await;
        }
        if is_due(checks, self.config.backup_every_ticks) {
            if let Err(e) = self.store.backup_session(&self.session_name).await {
                tracing::warn!(session = %self.session_name, error = %e, "Scheduled backup failed");
            }
        }
    }

    async fn attempt_reconnect(&self) -> ReconnectOutcome {
        let max = self.config.max_reconnect_attempts;
        let next = {
            let mut state = self.state();
            if state.reconnect_attempts >= max {
                let first = state.phase != MonitorPhase::Alerted;
                state.phase = MonitorPhase::Alerted;
                if first {
                    state.alerts_sent += 1;
                }
                Err((first, state.reconnect_attempts))
            } else {
                state.reconnect_attempts += 1;
                state.phase = MonitorPhase::Reconnecting;
                Ok(state.reconnect_attempts)
            }
        };

        let attempt = match next {
            Ok(attempt) => attempt,
            Err((first, attempts)) => {
                if first {
                    let alert = Alert::reconnect_exhausted(&self.session_name, attempts);
                    if let Err(e) = self.alerts.notify(&alert).await {
                        tracing::warn!(session = %self.session_name, error = %e, "Alert delivery failed");
                    }
                }
                return ReconnectOutcome::Exhausted;
            }
        };

        tracing::info!(session = %self.session_name, attempt, max, "Attempting reconnect");

        match self.store.load_session(&self.session_name).await {
            Some(session) => {
                if let Err(e) = self
                    .provider
                    .initialize(&self.session_name, Some(&session))
                    .await
                {
                    tracing::warn!(session = %self.session_name, error = %e, "Re-initialize failed");
                }
            }
            None => tracing::debug!(
                session = %self.session_name,
                "No valid stored session; waiting for the provider"
            ),
        }

        tokio::time::sleep(self.config.reconnect_grace).await;

        if self.probe().await {
            {
                let mut state = self.state();
                state.reconnect_attempts = 0;
                state.phase = MonitorPhase::Monitoring;
            }
            tracing::info!(session = %self.session_name, attempt, "Reconnected");
            ReconnectOutcome::Recovered
        } else {
            ReconnectOutcome::Retry(self.config.backoff_for(attempt))
        }
    }

    async fn autosave(&self) -> bool {
        match self.provider.export_session(&self.session_name).await {
            Ok(Some(session)) => self.store.save_session(&self.session_name, &session).await,
            Ok(None) => {
                tracing::debug!(session = %self.session_name, "Provider has no session to export");
                false
            }
            Err(e) => {
                tracing::warn!(session = %self.session_name, error = %e, "Session export failed");
                false
            }
        }
    }
}

const fn is_due(count: u64, every: u64) -> bool {
    every > 0 && count % every == 0
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use async_trait::async_trait;
    use gateway_core::{
        CryptoBox, Envelope, Tier,
        traits::{BroadcastReceipt, ConnectionStatus, ProviderError, QrCode, TierError},
    };
    use gateway_session::{
        BackupEntry, BackupStore,
        storage::{DatastoreTier, MemoryDatastore},
    };
    use serde_json::{Value, json};

    use super::*;
    use crate::alert::AlertError;

    const SESSION: &str = "support";

    #[derive(Default)]
    struct ScriptedProvider {
        connected: AtomicBool,
        connect_on_initialize: AtomicBool,
        fail_probe: AtomicBool,
        checks: AtomicUsize,
        initializes: AtomicUsize,
        exported: Mutex<Option<Value>>,
    }

    #[async_trait]
    impl ConnectionProvider for ScriptedProvider {
        async fn create_instance(&self, _session_name: &str) -> Result<(), ProviderError> {
            Ok(())
        }

        async fn check_connection_status(
            &self,
            _session_name: &str,
        ) -> Result<ConnectionStatus, ProviderError> {
            self.checks.fetch_add(1, Ordering::SeqCst);
            if self.fail_probe.load(Ordering::SeqCst) {
                return Err(ProviderError::Unavailable("browser crashed".to_string()));
            }
            Ok(ConnectionStatus {
                connected: self.connected.load(Ordering::SeqCst),
            })
        }

        async fn get_qr_code(&self, _session_name: &str) -> Result<Option<QrCode>, ProviderError> {
            Ok(None)
        }

        async fn initialize(
            &self,
            _session_name: &str,
            session: Option<&Value>,
        ) -> Result<(), ProviderError> {
            self.initializes.fetch_add(1, Ordering::SeqCst);
            if session.is_some() && self.connect_on_initialize.load(Ordering::SeqCst) {
                self.connected.store(true, Ordering::SeqCst);
            }
            Ok(())
        }

        async fn send_broadcast(
            &self,
            _recipients: &[String],
            _message: &str,
            _session_name: Option<&str>,
        ) -> Result<BroadcastReceipt, ProviderError> {
            Ok(BroadcastReceipt::default())
        }

        async fn export_session(&self, _session_name: &str) -> Result<Option<Value>, ProviderError> {
            Ok(self.exported.lock().unwrap().clone())
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        alerts: Mutex<Vec<Alert>>,
    }

    impl RecordingSink {
        fn count(&self) -> usize {
            self.alerts.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl AlertSink for RecordingSink {
        async fn notify(&self, alert: &Alert) -> Result<(), AlertError> {
            self.alerts.lock().unwrap().push(alert.clone());
            Ok(())
        }
    }

    #[derive(Default)]
    struct MemoryBackups {
        stored: Mutex<Vec<(BackupEntry, Envelope)>>,
    }

    #[async_trait]
    impl BackupStore for MemoryBackups {
        async fn store(
            &self,
            session_name: &str,
            envelope: &Envelope,
        ) -> Result<BackupEntry, TierError> {
            let mut stored = self.stored.lock().unwrap();
            let entry = BackupEntry {
                session_name: session_name.to_string(),
                created_at: i64::try_from(stored.len()).unwrap(),
            };
            stored.push((entry.clone(), envelope.clone()));
            Ok(entry)
        }

        async fn list(&self, session_name: &str) -> Result<Vec<BackupEntry>, TierError> {
            Ok(self
                .stored
                .lock()
                .unwrap()
                .iter()
                .rev()
                .filter(|(e, _)| e.session_name == session_name)
                .map(|(e, _)| e.clone())
                .collect())
        }

        async fn fetch(&self, entry: &BackupEntry) -> Result<Envelope, TierError> {
            self.stored
                .lock()
                .unwrap()
                .iter()
                .find(|(e, _)| e == entry)
                .map(|(_, envelope)| envelope.clone())
                .ok_or_else(|| TierError::Backend("missing backup".to_string()))
        }
    }

    struct Harness {
        provider: Arc<ScriptedProvider>,
        sink: Arc<RecordingSink>,
        store: Arc<SessionStore>,
        monitor: HealthMonitor,
    }

    fn config() -> MonitorConfig {
        MonitorConfig {
            check_interval: Duration::from_secs(30),
            max_reconnect_attempts: 5,
            reconnect_grace: Duration::from_secs(5),
            backoff_step: Duration::from_secs(10),
            backoff_cap: Duration::from_secs(60),
            backup_every_ticks: 0,
            autosave_every_ticks: 0,
        }
    }

    fn harness(config: MonitorConfig) -> Harness {
        let provider = Arc::new(ScriptedProvider::default());
        let sink = Arc::new(RecordingSink::default());
        let tiers: Vec<Arc<dyn Tier>> = vec![Arc::new(DatastoreTier::new(MemoryDatastore::new()))];
        let store = Arc::new(
            SessionStore::new(CryptoBox::new([5u8; 32]), tiers)
                .with_backups(Arc::new(MemoryBackups::default())),
        );
        let monitor = HealthMonitor::new(
            SESSION,
            Arc::clone(&provider) as Arc<dyn ConnectionProvider>,
            Arc::clone(&store),
            Arc::clone(&sink) as Arc<dyn AlertSink>,
            config,
        );
        Harness {
            provider,
            sink,
            store,
            monitor,
        }
    }

    async fn sleep_secs(secs: u64) {
        // Land just after the monitor's own timers so they run first.
        tokio::time::sleep(Duration::from_secs(secs) + Duration::from_millis(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_is_idempotent() {
        let h = harness(config());
        h.provider.connected.store(true, Ordering::SeqCst);

        assert!(h.monitor.start(Duration::from_secs(30)));
        assert!(!h.monitor.start(Duration::from_secs(30)));
        assert!(h.monitor.is_running());

        sleep_secs(30).await;
        assert_eq!(h.provider.checks.load(Ordering::SeqCst), 1);
        sleep_secs(30).await;
        assert_eq!(h.provider.checks.load(Ordering::SeqCst), 2);

        h.monitor.stop().await;
        assert_eq!(h.monitor.snapshot().phase, MonitorPhase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_checks_refused_while_polling() {
        let h = harness(config());
        h.monitor.start(Duration::from_secs(30));

        assert!(!h.monitor.check_health().await);
        assert_eq!(h.monitor.attempt_reconnect().await, None);
        assert_eq!(h.provider.checks.load(Ordering::SeqCst), 0);
        assert_eq!(h.monitor.snapshot().reconnect_attempts, 0);

        h.monitor.stop().await;
        assert!(h.monitor.check_health().await);
        assert_eq!(h.monitor.snapshot().reconnect_attempts, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_reconnection_alerts_once() {
        let h = harness(config());
        assert!(h.store.save_session(SESSION, &json!({"token": "abc"})).await);

        h.monitor.start(Duration::from_secs(30));
        sleep_secs(1_000).await;

        let snapshot = h.monitor.snapshot();
        assert_eq!(snapshot.phase, MonitorPhase::Alerted);
        assert_eq!(snapshot.reconnect_attempts, 5);
        assert_eq!(h.sink.count(), 1);
        assert_eq!(h.provider.initializes.load(Ordering::SeqCst), 5);

        // Suspended: more failed checks neither retry nor re-alert
        sleep_secs(600).await;
        assert_eq!(h.monitor.snapshot().reconnect_attempts, 5);
        assert_eq!(h.provider.initializes.load(Ordering::SeqCst), 5);
        assert_eq!(h.sink.count(), 1);

        // An out-of-band recovery resets the episode
        h.provider.connected.store(true, Ordering::SeqCst);
        sleep_secs(30).await;
        let snapshot = h.monitor.snapshot();
        assert_eq!(snapshot.phase, MonitorPhase::Monitoring);
        assert_eq!(snapshot.reconnect_attempts, 0);

        h.provider.connected.store(false, Ordering::SeqCst);
        sleep_secs(1_000).await;
        assert_eq!(h.sink.count(), 2);

        h.monitor.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_schedule() {
        let h = harness(config());
        h.monitor.start(Duration::from_secs(30));

        // Tick at 30s, re-probe after the 5s grace.
        sleep_secs(35).await;
        assert_eq!(h.provider.checks.load(Ordering::SeqCst), 2);
        assert_eq!(h.monitor.snapshot().phase, MonitorPhase::Reconnecting);

        // Attempt 2 after a 10s backoff, re-probed 5s later.
        sleep_secs(15).await;
        assert_eq!(h.provider.checks.load(Ordering::SeqCst), 3);
        assert_eq!(h.monitor.snapshot().reconnect_attempts, 2);

        // Attempt 3 waits 20s.
        sleep_secs(19).await;
        assert_eq!(h.monitor.snapshot().reconnect_attempts, 2);
        sleep_secs(1).await;
        assert_eq!(h.monitor.snapshot().reconnect_attempts, 3);

        h.monitor.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_cancels_pending_backoff() {
        let h = harness(config());
        h.monitor.start(Duration::from_secs(30));

        // Inside the first backoff delay
        sleep_secs(36).await;
        assert_eq!(h.monitor.snapshot().reconnect_attempts, 1);

        h.monitor.stop().await;
        assert!(!h.monitor.is_running());
        let checks = h.provider.checks.load(Ordering::SeqCst);

        sleep_secs(1_000).await;
        assert_eq!(h.provider.checks.load(Ordering::SeqCst), checks);
        assert_eq!(h.monitor.snapshot().reconnect_attempts, 1);
        assert_eq!(h.monitor.snapshot().phase, MonitorPhase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_from_stored_session() {
        let h = harness(config());
        assert!(h.store.save_session(SESSION, &json!({"token": "abc"})).await);
        h.provider.connect_on_initialize.store(true, Ordering::SeqCst);

        assert_eq!(
            h.monitor.attempt_reconnect().await,
            Some(ReconnectOutcome::Recovered)
        );
        let snapshot = h.monitor.snapshot();
        assert_eq!(snapshot.reconnect_attempts, 0);
        assert_eq!(snapshot.phase, MonitorPhase::Monitoring);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_stored_session_skips_initialize() {
        let h = harness(config());

        assert_eq!(
            h.monitor.attempt_reconnect().await,
            Some(ReconnectOutcome::Retry(Duration::from_secs(10)))
        );
        assert_eq!(h.provider.initializes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_errors_count_as_disconnected() {
        let h = harness(config());
        h.provider.fail_probe.store(true, Ordering::SeqCst);

        assert!(h.monitor.check_health().await);
        let snapshot = h.monitor.snapshot();
        assert_eq!(snapshot.phase, MonitorPhase::Alerted);
        assert_eq!(snapshot.reconnect_attempts, 5);
        assert_eq!(h.sink.count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_after_alert() {
        let h = harness(config());
        assert!(h.monitor.check_health().await);
        assert_eq!(h.monitor.snapshot().phase, MonitorPhase::Alerted);

        h.monitor.resume();
        let snapshot = h.monitor.snapshot();
        assert_eq!(snapshot.reconnect_attempts, 0);
        assert_eq!(snapshot.phase, MonitorPhase::Idle);

        assert!(h.monitor.check_health().await);
        assert_eq!(h.sink.count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduled_backup_and_autosave() {
        let h = harness(MonitorConfig {
            backup_every_ticks: 2,
            autosave_every_ticks: 1,
            ..config()
        });
        h.provider.connected.store(true, Ordering::SeqCst);
        *h.provider.exported.lock().unwrap() = Some(json!({"token": "live"}));

        h.monitor.start(Duration::from_secs(30));
        sleep_secs(30).await;
        assert_eq!(h.store.load_session(SESSION).await, Some(json!({"token": "live"})));
        assert!(h.store.list_backups(SESSION).await.unwrap().is_empty());

        sleep_secs(30).await;
        assert_eq!(h.store.list_backups(SESSION).await.unwrap().len(), 1);
        sleep_secs(60).await;
        assert_eq!(h.store.list_backups(SESSION).await.unwrap().len(), 2);

        h.monitor.stop().await;
    }

    #[tokio::test]
    async fn test_save_now_without_export() {
        let h = harness(config());
        assert!(!h.monitor.save_now().await);

        *h.provider.exported.lock().unwrap() = Some(json!({"token": "manual"}));
        assert!(h.monitor.save_now().await);
        assert!(h.store.has_valid_session(SESSION).await);
    }
}
