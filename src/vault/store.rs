use async_trait::async_trait;
use sqlx::PgPool;

use super::models::StoredApiKey;
use crate::db::timed;
use crate::error::AppResult;

/// Persistence capability behind the Vault. Implementations only ever see
/// ciphertext.
#[async_trait]
pub trait ApiKeyStore: Send + Sync {
    /// Records for the pair whose expiry lies strictly in the future, most
    /// recently expiring first.
    async fn valid_keys(&self, team: &str, external_group_id: &str)
        -> AppResult<Vec<StoredApiKey>>;

    /// Expires every currently valid record for the pair and inserts
    /// `key_ciphertext` with a fresh validity period, as one atomic unit.
    /// Concurrent rotations of the same pair serialize.
    async fn rotate(
        &self,
        team: &str,
        external_group_id: &str,
        key_ciphertext: &str,
    ) -> AppResult<()>;
}

#[derive(Clone)]
pub struct PgApiKeyStore {
    pool: PgPool,
}

impl PgApiKeyStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ApiKeyStore for PgApiKeyStore {
    async fn valid_keys(
        &self,
        team: &str,
        external_group_id: &str,
    ) -> AppResult<Vec<StoredApiKey>> {
        let rows = timed(
            sqlx::query_as::<_, StoredApiKey>(
                r#"
                SELECT key_ciphertext, team, team_external_group_id, created, expires
                FROM apikey
                WHERE team = $1 AND team_external_group_id = $2 AND expires > NOW()
                ORDER BY expires DESC
                "#,
            )
            .bind(team)
            .bind(external_group_id)
            .fetch_all(&self.pool),
        )
        .await?;
        Ok(rows)
    }

    async fn rotate(
        &self,
        team: &str,
        external_group_id: &str,
        key_ciphertext: &str,
    ) -> AppResult<()> {
        let mut tx = self.pool.begin().await?;

        // Serializes rotations of the same pair; released on commit/rollback.
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1 || '/' || $2))")
            .bind(team)
            .bind(external_group_id)
            .execute(&mut *tx)
            .await?;

        timed(
            sqlx::query(
                "UPDATE apikey SET expires = NOW() WHERE expires > NOW() AND team = $1 AND team_external_group_id = $2",
            )
            .bind(team)
            .bind(external_group_id)
            .execute(&mut *tx),
        )
        .await?;

        timed(
            sqlx::query(
                r#"
                INSERT INTO apikey (key_ciphertext, team, team_external_group_id, created, expires)
                VALUES ($1, $2, $3, NOW(), NOW() + MAKE_INTERVAL(years := 5))
                "#,
            )
            .bind(key_ciphertext)
            .bind(team)
            .bind(external_group_id)
            .execute(&mut *tx),
        )
        .await?;

        tx.commit().await?;
        Ok(())
    }
}
