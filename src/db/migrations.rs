use sqlx::{Executor, PgPool};
use tracing::{info, warn};

/// Schema versions, applied in order. Version `n` is `MIGRATIONS[n - 1]`.
/// Append only: never edit an entry that has shipped.
pub const MIGRATIONS: &[&str] = &[
    // 1
    r#"
    CREATE TABLE IF NOT EXISTS migrations (
        version INTEGER PRIMARY KEY,
        created TIMESTAMPTZ NOT NULL DEFAULT NOW()
    );
    CREATE TABLE IF NOT EXISTS apikey (
        key_ciphertext TEXT NOT NULL,
        team TEXT NOT NULL,
        team_external_group_id TEXT NOT NULL,
        created TIMESTAMPTZ NOT NULL,
        expires TIMESTAMPTZ NOT NULL
    );
    "#,
    // 2
    r#"
    CREATE TABLE IF NOT EXISTS team_repositories (
        team TEXT NOT NULL,
        repository TEXT NOT NULL,
        PRIMARY KEY (repository, team)
    );
    "#,
    // 3
    r#"
    CREATE TABLE IF NOT EXISTS bus_messages (
        id BIGSERIAL PRIMARY KEY,
        topic TEXT NOT NULL,
        message_key TEXT NOT NULL,
        payload JSONB NOT NULL,
        created TIMESTAMPTZ NOT NULL DEFAULT NOW()
    );
    CREATE INDEX IF NOT EXISTS bus_messages_topic_id ON bus_messages (topic, id);
    CREATE TABLE IF NOT EXISTS bus_offsets (
        consumer TEXT NOT NULL,
        topic TEXT NOT NULL,
        position BIGINT NOT NULL,
        updated TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        PRIMARY KEY (consumer, topic)
    );
    "#,
    // 4
    r#"
    CREATE INDEX IF NOT EXISTS apikey_identity
        ON apikey (team, team_external_group_id, expires DESC);
    "#,
    // 5
    r#"
    ALTER TABLE bus_messages
        ADD COLUMN IF NOT EXISTS txid BIGINT NOT NULL DEFAULT txid_current();
    ALTER TABLE bus_offsets
        ADD COLUMN IF NOT EXISTS position_txid BIGINT NOT NULL DEFAULT 0;
    UPDATE bus_offsets SET position_txid = txid_current();
    CREATE INDEX IF NOT EXISTS bus_messages_topic_txid_id ON bus_messages (topic, txid, id);
    "#,
];

/// Highest version recorded in the `migrations` table. A missing table means
/// an empty schema, so any read error counts as version 0.
pub async fn current_version(pool: &PgPool) -> i32 {
    match sqlx::query_scalar::<_, Option<i32>>("SELECT MAX(version) FROM migrations")
        .fetch_one(pool)
        .await
    {
        Ok(version) => version.unwrap_or(0),
        Err(err) => {
            warn!(?err, "unable to read current migration version; assuming empty schema");
            0
        }
    }
}

/// Applies every version above the stored maximum, each in its own
/// transaction together with its version record. Returns the number of
/// versions applied.
pub async fn migrate(pool: &PgPool) -> Result<usize, sqlx::Error> {
    let current = current_version(pool).await;
    let pending = pending(current);

    for (version, statements) in &pending {
        info!(version, "migrating database schema");
        let mut tx = pool.begin().await?;
        (&mut *tx).execute(*statements).await?;
        sqlx::query("INSERT INTO migrations (version) VALUES ($1)")
            .bind(version)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
    }

    Ok(pending.len())
}

/// Versions strictly greater than `current`, ascending.
pub fn pending(current: i32) -> Vec<(i32, &'static str)> {
    MIGRATIONS
        .iter()
        .enumerate()
        .map(|(index, statements)| (index as i32 + 1, *statements))
        .filter(|(version, _)| *version > current)
        .collect()
}
