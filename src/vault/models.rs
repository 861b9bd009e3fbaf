use std::fmt;

use chrono::{DateTime, Months, Utc};
use serde::{Deserialize, Serialize};

/// Lifetime of a freshly rotated key.
pub const KEY_VALIDITY: Months = Months::new(12 * 5);

/// Raw secret bytes of a team API key. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct KeyMaterial(Vec<u8>);

impl KeyMaterial {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyMaterial({} bytes)", self.0.len())
    }
}

/// Decrypted API key as handed out by `Vault::lookup`.
#[derive(Clone, Debug)]
pub struct ApiKeyRecord {
    pub team: String,
    pub external_group_id: String,
    pub key: KeyMaterial,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl ApiKeyRecord {
    /// A record is valid iff it expires strictly after `now`.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

/// Row shape of the `apikey` table; key material only as hex ciphertext.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, sqlx::FromRow)]
pub struct StoredApiKey {
    pub key_ciphertext: String,
    pub team: String,
    #[sqlx(rename = "team_external_group_id")]
    pub external_group_id: String,
    #[sqlx(rename = "created")]
    pub created_at: DateTime<Utc>,
    #[sqlx(rename = "expires")]
    pub expires_at: DateTime<Utc>,
}

impl StoredApiKey {
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }

    pub fn matches(&self, team: &str, external_group_id: &str) -> bool {
        self.team == team && self.external_group_id == external_group_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn expiry_exactly_now_is_invalid() {
        let now = Utc::now();
        let record = ApiKeyRecord {
            team: "acme".into(),
            external_group_id: "g1".into(),
            key: KeyMaterial::new(vec![1, 2, 3]),
            created_at: now - Duration::days(1),
            expires_at: now,
        };
        assert!(!record.is_valid_at(now));
        assert!(record.is_valid_at(now - Duration::seconds(1)));
    }

    #[test]
    fn key_material_is_redacted_in_debug_output() {
        let key = KeyMaterial::new(vec![0xab, 0xcd, 0xef]);
        assert_eq!(format!("{key:?}"), "KeyMaterial(3 bytes)");
        assert_eq!(key.to_hex(), "abcdef");
    }
}
