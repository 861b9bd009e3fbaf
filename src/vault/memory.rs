use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use super::models::{StoredApiKey, KEY_VALIDITY};
use super::store::ApiKeyStore;
use crate::error::{AppError, AppResult};

/// In-process `ApiKeyStore`. Rotation holds the write lock for both steps,
/// so readers observe either the old or the new key set.
#[derive(Default)]
pub struct MemoryApiKeyStore {
    records: RwLock<Vec<StoredApiKey>>,
}

impl MemoryApiKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a record verbatim, bypassing rotation.
    pub async fn insert(&self, record: StoredApiKey) {
        self.records.write().await.push(record);
    }

    pub async fn records(&self) -> Vec<StoredApiKey> {
        self.records.read().await.clone()
    }
}

#[async_trait]
impl ApiKeyStore for MemoryApiKeyStore {
    async fn valid_keys(
        &self,
        team: &str,
        external_group_id: &str,
    ) -> AppResult<Vec<StoredApiKey>> {
        let now = Utc::now();
        let mut keys: Vec<StoredApiKey> = self
            .records
            .read()
            .await
            .iter()
            .filter(|record| record.matches(team, external_group_id) && record.is_valid_at(now))
            .cloned()
            .collect();
        keys.sort_by(|a, b| b.expires_at.cmp(&a.expires_at));
        Ok(keys)
    }

    async fn rotate(
        &self,
        team: &str,
        external_group_id: &str,
        key_ciphertext: &str,
    ) -> AppResult<()> {
        let mut records = self.records.write().await;
        let now = Utc::now();
        let expires_at = now
            .checked_add_months(KEY_VALIDITY)
            .ok_or_else(|| AppError::InfraFailure("key expiry out of range".into()))?;

        for record in records
            .iter_mut()
            .filter(|record| record.matches(team, external_group_id) && record.is_valid_at(now))
        {
            record.expires_at = now;
        }
        records.push(StoredApiKey {
            key_ciphertext: key_ciphertext.to_string(),
            team: team.to_string(),
            external_group_id: external_group_id.to_string(),
            created_at: now,
            expires_at,
        });
        Ok(())
    }
}
