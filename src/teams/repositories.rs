use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use sqlx::PgPool;
use tokio::sync::RwLock;

use crate::db::timed;
use crate::error::{AppError, AppResult};

/// Teams allowed to deploy a repository.
#[async_trait]
pub trait RepositoryTeamStore: Send + Sync {
    /// Sorted team list, or `NotFound` when the repository has none.
    async fn read(&self, repository: &str) -> AppResult<Vec<String>>;

    /// Replaces the full team set of `repository` atomically.
    async fn write(&self, repository: &str, teams: &[String]) -> AppResult<()>;
}

#[derive(Clone)]
pub struct PgRepositoryTeamStore {
    pool: PgPool,
}

impl PgRepositoryTeamStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RepositoryTeamStore for PgRepositoryTeamStore {
    async fn read(&self, repository: &str) -> AppResult<Vec<String>> {
        let teams: Vec<String> = timed(
            sqlx::query_scalar(
                "SELECT team FROM team_repositories WHERE repository = $1 ORDER BY team",
            )
            .bind(repository)
            .fetch_all(&self.pool),
        )
        .await?;
        if teams.is_empty() {
            return Err(AppError::NotFound);
        }
        Ok(teams)
    }

    async fn write(&self, repository: &str, teams: &[String]) -> AppResult<()> {
        let mut tx = self.pool.begin().await?;
        timed(
            sqlx::query("DELETE FROM team_repositories WHERE repository = $1")
                .bind(repository)
                .execute(&mut *tx),
        )
        .await?;
        for team in normalize(teams) {
            timed(
                sqlx::query("INSERT INTO team_repositories (team, repository) VALUES ($1, $2)")
                    .bind(&team)
                    .bind(repository)
                    .execute(&mut *tx),
            )
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryRepositoryTeamStore {
    mapping: RwLock<HashMap<String, BTreeSet<String>>>,
}

impl MemoryRepositoryTeamStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RepositoryTeamStore for MemoryRepositoryTeamStore {
    async fn read(&self, repository: &str) -> AppResult<Vec<String>> {
        self.mapping
            .read()
            .await
            .get(repository)
            .filter(|teams| !teams.is_empty())
            .map(|teams| teams.iter().cloned().collect())
            .ok_or(AppError::NotFound)
    }

    async fn write(&self, repository: &str, teams: &[String]) -> AppResult<()> {
        self.mapping
            .write()
            .await
            .insert(repository.to_string(), normalize(teams));
        Ok(())
    }
}

/// Trimmed, de-duplicated, non-empty team names.
fn normalize(teams: &[String]) -> BTreeSet<String> {
    teams
        .iter()
        .map(|team| team.trim())
        .filter(|team| !team.is_empty())
        .map(str::to_string)
        .collect()
}
