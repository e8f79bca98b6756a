//! Encrypted multi-tier session persistence.
//!
//! Provides:
//! - `SessionStore` - Save/load/delete/backup across ordered tiers
//! - `TierReport` - Per-tier outcome of a save or delete
//! - Tier implementations (cache, datastore, file) and backups

pub mod backup;
pub mod report;
pub mod storage;
pub mod store;

pub use backup::{BackupEntry, BackupStore, FileBackupStore};
pub use report::{AcceptancePolicy, TierOutcome, TierReport};
pub use store::{SessionStore, StoreError};
