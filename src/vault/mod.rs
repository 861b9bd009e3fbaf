//! Encrypted storage and rotation of per-team API keys.

pub mod memory;
pub mod models;
pub mod store;

use std::sync::Arc;

use tracing::{error, info};

pub use memory::MemoryApiKeyStore;
pub use models::{ApiKeyRecord, KeyMaterial, StoredApiKey, KEY_VALIDITY};
pub use store::{ApiKeyStore, PgApiKeyStore};

use crate::crypto::EncryptionKey;
use crate::error::{AppError, AppResult};

#[derive(Clone)]
pub struct Vault {
    store: Arc<dyn ApiKeyStore>,
    cipher: EncryptionKey,
}

impl Vault {
    pub fn new(store: Arc<dyn ApiKeyStore>, cipher: EncryptionKey) -> Self {
        Self { store, cipher }
    }

    /// Valid keys for the pair, most recently expiring first.
    ///
    /// A record that fails to decode or decrypt aborts the whole lookup with
    /// `EncodingFailure`: a corrupted row is data corruption and must surface.
    pub async fn lookup(
        &self,
        team: &str,
        external_group_id: &str,
    ) -> AppResult<Vec<ApiKeyRecord>> {
        let stored = self.store.valid_keys(team, external_group_id).await?;
        if stored.is_empty() {
            return Err(AppError::NotFound);
        }

        stored
            .into_iter()
            .map(|record| {
                let key = self.cipher.open_hex(&record.key_ciphertext).map_err(|err| {
                    error!(
                        %team,
                        %external_group_id,
                        created_at = %record.created_at,
                        ?err,
                        "stored api key could not be decrypted"
                    );
                    err
                })?;
                Ok(ApiKeyRecord {
                    team: record.team,
                    external_group_id: record.external_group_id,
                    key: KeyMaterial::new(key),
                    created_at: record.created_at,
                    expires_at: record.expires_at,
                })
            })
            .collect()
    }

    /// Supersedes every valid key of the pair with `key`.
    pub async fn rotate(
        &self,
        team: &str,
        external_group_id: &str,
        key: &KeyMaterial,
    ) -> AppResult<()> {
        let ciphertext = self.cipher.seal_hex(key.as_bytes())?;
        self.store
            .rotate(team, external_group_id, &ciphertext)
            .await
            .map_err(|err| {
                error!(%team, %external_group_id, ?err, "api key rotation failed");
                err
            })?;
        info!(%team, %external_group_id, "api key rotated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn vault_with(store: Arc<MemoryApiKeyStore>) -> Vault {
        Vault::new(store, EncryptionKey::generate())
    }

    #[tokio::test]
    async fn lookup_without_keys_is_not_found() {
        let vault = vault_with(Arc::new(MemoryApiKeyStore::new()));
        assert!(matches!(
            vault.lookup("acme", "g1").await,
            Err(AppError::NotFound)
        ));
    }

    #[tokio::test]
    async fn rotation_leaves_exactly_the_new_key_valid() {
        let store = Arc::new(MemoryApiKeyStore::new());
        let vault = vault_with(store.clone());
        let k1 = KeyMaterial::new(b"first".to_vec());
        let k2 = KeyMaterial::new(b"second".to_vec());

        vault.rotate("acme", "g1", &k1).await.unwrap();
        let before = vault.lookup("acme", "g1").await.unwrap();
        assert_eq!(before.len(), 1);
        assert_eq!(before[0].key, k1);

        vault.rotate("acme", "g1", &k2).await.unwrap();
        let after = vault.lookup("acme", "g1").await.unwrap();
        assert_eq!(after.len(), 1);
        assert_eq!(after[0].key, k2);

        // The superseded record is kept, only expired.
        assert_eq!(store.records().await.len(), 2);
    }

    #[tokio::test]
    async fn rotation_is_scoped_to_the_pair() {
        let vault = vault_with(Arc::new(MemoryApiKeyStore::new()));
        vault
            .rotate("acme", "g1", &KeyMaterial::new(b"acme".to_vec()))
            .await
            .unwrap();
        vault
            .rotate("other", "g2", &KeyMaterial::new(b"other".to_vec()))
            .await
            .unwrap();
        vault
            .rotate("acme", "g1", &KeyMaterial::new(b"acme-2".to_vec()))
            .await
            .unwrap();

        let other = vault.lookup("other", "g2").await.unwrap();
        assert_eq!(other[0].key.as_bytes(), b"other");
    }

    #[tokio::test]
    async fn keys_are_stored_as_hex_ciphertext() {
        let store = Arc::new(MemoryApiKeyStore::new());
        let vault = vault_with(store.clone());
        vault
            .rotate("acme", "g1", &KeyMaterial::new(vec![0xab, 0xcd, 0xef]))
            .await
            .unwrap();
        let stored = store.records().await;
        assert!(hex::decode(&stored[0].key_ciphertext).is_ok());
        assert!(!stored[0].key_ciphertext.contains("abcdef"));
    }

    #[tokio::test]
    async fn lookup_orders_most_recently_expiring_first() {
        let store = Arc::new(MemoryApiKeyStore::new());
        let cipher = EncryptionKey::generate();
        let now = Utc::now();
        for (name, days) in [("soon", 1), ("later", 30)] {
            store
                .insert(StoredApiKey {
                    key_ciphertext: cipher.seal_hex(name.as_bytes()).unwrap(),
                    team: "acme".into(),
                    external_group_id: "g1".into(),
                    created_at: now,
                    expires_at: now + Duration::days(days),
                })
                .await;
        }
        let vault = Vault::new(store, cipher);
        let keys = vault.lookup("acme", "g1").await.unwrap();
        assert_eq!(keys[0].key.as_bytes(), b"later");
        assert_eq!(keys[1].key.as_bytes(), b"soon");
    }

    #[tokio::test]
    async fn only_expired_keys_is_not_found() {
        let store = Arc::new(MemoryApiKeyStore::new());
        let cipher = EncryptionKey::generate();
        store
            .insert(StoredApiKey {
                key_ciphertext: cipher.seal_hex(b"expired").unwrap(),
                team: "acme".into(),
                external_group_id: "g1".into(),
                created_at: Utc::now() - Duration::days(400),
                expires_at: Utc::now() - Duration::days(1),
            })
            .await;
        let vault = Vault::new(store, cipher);
        assert!(matches!(
            vault.lookup("acme", "g1").await,
            Err(AppError::NotFound)
        ));
    }

    #[tokio::test]
    async fn corrupted_record_aborts_lookup() {
        let store = Arc::new(MemoryApiKeyStore::new());
        let vault = vault_with(store.clone());
        vault
            .rotate("acme", "g1", &KeyMaterial::new(b"good".to_vec()))
            .await
            .unwrap();
        store
            .insert(StoredApiKey {
                key_ciphertext: "not-hex".into(),
                team: "acme".into(),
                external_group_id: "g1".into(),
                created_at: Utc::now(),
                expires_at: Utc::now() + Duration::days(1),
            })
            .await;
        assert!(matches!(
            vault.lookup("acme", "g1").await,
            Err(AppError::EncodingFailure(_))
        ));
    }

    #[tokio::test]
    async fn concurrent_rotations_leave_a_single_valid_key() {
        let vault = vault_with(Arc::new(MemoryApiKeyStore::new()));
        let mut handles = Vec::new();
        for i in 0..8u8 {
            let vault = vault.clone();
            handles.push(tokio::spawn(async move {
                vault
                    .rotate("acme", "g1", &KeyMaterial::new(vec![i]))
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(vault.lookup("acme", "g1").await.unwrap().len(), 1);
    }
}
