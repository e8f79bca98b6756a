//! Core abstractions for durable multi-account messaging sessions.
//!
//! This crate provides the fundamental building blocks:
//! - `Envelope` - Tier-portable encrypted session payload
//! - `CryptoBox` - Authenticated encryption of session blobs
//! - `GatewayConfig` - Process configuration
//! - Tier and connection provider traits

pub mod config;
pub mod crypto;
pub mod envelope;
pub mod traits;

pub use config::{ConfigError, CryptoConfig, GatewayConfig, MonitorConfig, TierConfig};
pub use crypto::{CryptoBox, CryptoError};
pub use envelope::Envelope;
pub use traits::{ConnectionProvider, Tier, TierKind};
