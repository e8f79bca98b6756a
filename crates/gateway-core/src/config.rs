//! Gateway configuration.

use std::{path::PathBuf, str::FromStr, time::Duration};

use thiserror::Error;

/// Configuration error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(
        "No session encryption key configured (set GATEWAY_ENCRYPTION_KEY, \
         or GATEWAY_EPHEMERAL_KEY=1 for development)"
    )]
    MissingEncryptionKey,
    #[error("Invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Encryption key settings.
#[derive(Debug, Clone, Default)]
pub struct CryptoConfig {
    /// 32-byte key as 64 hex characters or base64.
    pub encryption_key: Option<String>,
    /// Generate a throwaway key when none is configured.
    pub allow_ephemeral_key: bool,
}

/// Storage tier settings.
#[derive(Debug, Clone)]
pub struct TierConfig {
    /// Enable the fast cache tier.
    pub cache_enabled: bool,
    /// Expiry for cache entries.
    pub cache_ttl: Duration,
    /// Enable the durable datastore tier.
    pub datastore_enabled: bool,
    /// Enable the durable file tier.
    pub file_enabled: bool,
    /// Root directory of the file tier.
    pub session_dir: PathBuf,
    /// Root directory for session backups.
    pub backup_dir: PathBuf,
    /// Backups kept per session (oldest pruned first).
    pub max_backups: usize,
}

impl Default for TierConfig {
    fn default() -> Self {
        let base = dirs::data_local_dir()
            .map_or_else(|| PathBuf::from(".msg-gateway"), |d| d.join("msg-gateway"));
        Self {
            cache_enabled: true,
            cache_ttl: Duration::from_secs(7 * 24 * 60 * 60),
            datastore_enabled: true,
            file_enabled: true,
            session_dir: base.join("sessions"),
            backup_dir: base.join("backups"),
            max_backups: 10,
        }
    }
}

/// Health monitor settings.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Interval between health checks.
    pub check_interval: Duration,
    /// Reconnect attempts before alerting and suspending.
    pub max_reconnect_attempts: u32,
    /// Wait after re-initializing before probing again.
    pub reconnect_grace: Duration,
    /// Backoff grows by this much per failed attempt.
    pub backoff_step: Duration,
    /// Upper bound on the backoff delay.
    pub backoff_cap: Duration,
    /// Back up the session every N healthy checks (0 disables).
    pub backup_every_ticks: u64,
    /// Export and save the live session every N healthy checks (0 disables).
    pub autosave_every_ticks: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(30),
            max_reconnect_attempts: 5,
            reconnect_grace: Duration::from_secs(5),
            backoff_step: Duration::from_secs(10),
            backoff_cap: Duration::from_secs(60),
            // ~6h and ~5min at the default interval
            backup_every_ticks: 720,
            autosave_every_ticks: 10,
        }
    }
}

impl MonitorConfig {
    /// Delay before the next attempt after `attempts` failures.
    #[must_use]
    pub fn backoff_for(&self, attempts: u32) -> Duration {
        self.backoff_step.saturating_mul(attempts).min(self.backoff_cap)
    }
}

/// Top-level gateway configuration.
#[derive(Debug, Clone, Default)]
pub struct GatewayConfig {
    pub crypto: CryptoConfig,
    pub tiers: TierConfig,
    pub monitor: MonitorConfig,
}

impl GatewayConfig {
    /// Defaults overlaid with `GATEWAY_*` environment variables.
    ///
    /// # Errors
    /// Returns error if a variable is present but malformed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Defaults overlaid with values from an arbitrary lookup.
    ///
    /// # Errors
    /// Returns error if a value is present but malformed.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let mut config = Self::default();

        config.crypto.encryption_key = get("GATEWAY_ENCRYPTION_KEY");
        if let Some(v) = get("GATEWAY_EPHEMERAL_KEY") {
            config.crypto.allow_ephemeral_key = parse_bool("GATEWAY_EPHEMERAL_KEY", &v)?;
        }

        if let Some(v) = get("GATEWAY_CACHE_ENABLED") {
            config.tiers.cache_enabled = parse_bool("GATEWAY_CACHE_ENABLED", &v)?;
        }
        if let Some(v) = get("GATEWAY_CACHE_TTL_SECS") {
            config.tiers.cache_ttl = Duration::from_secs(parse("GATEWAY_CACHE_TTL_SECS", &v)?);
        }
        if let Some(v) = get("GATEWAY_DATASTORE_ENABLED") {
            config.tiers.datastore_enabled = parse_bool("GATEWAY_DATASTORE_ENABLED", &v)?;
        }
        if let Some(v) = get("GATEWAY_FILE_ENABLED") {
            config.tiers.file_enabled = parse_bool("GATEWAY_FILE_ENABLED", &v)?;
        }
        if let Some(v) = get("GATEWAY_SESSION_DIR") {
            config.tiers.session_dir = PathBuf::from(v);
        }
        if let Some(v) = get("GATEWAY_BACKUP_DIR") {
            config.tiers.backup_dir = PathBuf::from(v);
        }
        if let Some(v) = get("GATEWAY_MAX_BACKUPS") {
            config.tiers.max_backups = parse("GATEWAY_MAX_BACKUPS", &v)?;
        }

        if let Some(v) = get("GATEWAY_CHECK_INTERVAL_SECS") {
            let secs: u64 = parse("GATEWAY_CHECK_INTERVAL_SECS", &v)?;
            if secs == 0 {
                return Err(ConfigError::Invalid {
                    name: "GATEWAY_CHECK_INTERVAL_SECS",
                    reason: "must be greater than zero".to_string(),
                });
            }
            config.monitor.check_interval = Duration::from_secs(secs);
        }
        if let Some(v) = get("GATEWAY_MAX_RECONNECT_ATTEMPTS") {
            config.monitor.max_reconnect_attempts = parse("GATEWAY_MAX_RECONNECT_ATTEMPTS", &v)?;
        }

        Ok(config)
    }
}

fn parse<T>(name: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.parse().map_err(|e: T::Err| ConfigError::Invalid {
        name,
        reason: e.to_string(),
    })
}

fn parse_bool(name: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::Invalid {
            name,
            reason: format!("expected a boolean, got '{other}'"),
        }),
    }
}
