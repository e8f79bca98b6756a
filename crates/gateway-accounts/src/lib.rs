//! Named messaging accounts over a shared connection provider.
//!
//! Provides:
//! - `AccountRegistry` - Provision, probe and send per named account
//! - `AccountStatus` - Best-effort live status snapshot

pub mod registry;

pub use registry::{AccountError, AccountMetadata, AccountRegistry, AccountStatus};
