//! Encrypted session envelope.

use serde::{Deserialize, Serialize};

/// Encrypted, tier-portable representation of a session.
///
/// Every field is lowercase hex. The JSON form is identical across tiers:
/// `{"ciphertext": "..", "iv": "..", "authTag": ".."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// Encrypted payload.
    pub ciphertext: String,
    /// Per-encryption initialization vector.
    pub iv: String,
    /// Authentication tag.
    pub auth_tag: String,
}

impl Envelope {
    /// Serialize to the persisted JSON form.
    ///
    /// # Errors
    /// Returns error if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse from the persisted JSON form.
    ///
    /// # Errors
    /// Returns error if the input is not a valid envelope.
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}
