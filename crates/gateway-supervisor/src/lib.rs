//! Connection health monitoring with bounded-backoff reconnection.
//!
//! Provides:
//! - `HealthMonitor` - Per-connection polling and reconnect state machine
//! - Alert sink trait with a log-only default

pub mod alert;
pub mod monitor;

pub use alert::{Alert, AlertError, AlertSink, LogAlertSink};
pub use monitor::{HealthMonitor, HealthSnapshot, MonitorPhase, ReconnectOutcome};
