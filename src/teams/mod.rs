//! Team identity: the team → external group mapping used to scope keys, and
//! the legacy repository → teams mapping.

pub mod repositories;

use std::collections::HashMap;

use async_trait::async_trait;

pub use repositories::{MemoryRepositoryTeamStore, PgRepositoryTeamStore, RepositoryTeamStore};

use crate::error::{AppError, AppResult};

/// Resolves a team name to the external group id its keys are scoped to.
#[async_trait]
pub trait TeamDirectory: Send + Sync {
    async fn external_group_id(&self, team: &str) -> AppResult<String>;
}

/// Directory backed by a fixed map, loaded from configuration.
#[derive(Clone, Debug, Default)]
pub struct StaticTeamDirectory {
    groups: HashMap<String, String>,
}

impl StaticTeamDirectory {
    pub fn new(groups: HashMap<String, String>) -> Self {
        Self { groups }
    }

    pub fn with_team(mut self, team: impl Into<String>, group: impl Into<String>) -> Self {
        self.groups.insert(team.into(), group.into());
        self
    }
}

#[async_trait]
impl TeamDirectory for StaticTeamDirectory {
    async fn external_group_id(&self, team: &str) -> AppResult<String> {
        self.groups.get(team).cloned().ok_or(AppError::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_team_is_not_found() {
        let directory = StaticTeamDirectory::default().with_team("acme", "g1");
        assert_eq!(directory.external_group_id("acme").await.unwrap(), "g1");
        assert!(matches!(
            directory.external_group_id("ghost").await,
            Err(AppError::NotFound)
        ));
    }
}
