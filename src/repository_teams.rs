use axum::{body::Bytes, extract::Extension, Json};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::context::AppContext;
use crate::dispatcher::is_repository_name;
use crate::error::{AppError, AppResult};
use crate::extractor::{parse_json, RequestSignature};

#[derive(Debug, Deserialize)]
pub struct WriteRepositoryTeams {
    pub repository: String,
    pub teams: Vec<String>,
    pub timestamp: i64,
}

#[derive(Debug, Deserialize)]
pub struct QueryRepositoryTeams {
    pub repository: String,
    pub timestamp: i64,
}

#[derive(Debug, Serialize)]
pub struct RepositoryTeams {
    pub repository: String,
    pub teams: Vec<String>,
}

pub async fn write_repository_teams(
    Extension(ctx): Extension<AppContext>,
    RequestSignature(signature): RequestSignature,
    body: Bytes,
) -> AppResult<Json<RepositoryTeams>> {
    ctx.authenticator.verify_provisioning(&body, &signature)?;
    let request: WriteRepositoryTeams = parse_json(&body)?;
    ctx.authenticator.check_timestamp(request.timestamp)?;
    validate_repository(&request.repository)?;

    let deadline = ctx.deadline();
    deadline
        .run(
            "write repository teams",
            ctx.repository_teams.write(&request.repository, &request.teams),
        )
        .await?;
    let teams = match deadline
        .run(
            "read repository teams",
            ctx.repository_teams.read(&request.repository),
        )
        .await
    {
        Ok(teams) => teams,
        Err(AppError::NotFound) => Vec::new(),
        Err(err) => return Err(err),
    };
    info!(repository = %request.repository, teams = teams.len(), "repository teams replaced");

    Ok(Json(RepositoryTeams {
        repository: request.repository,
        teams,
    }))
}

pub async fn query_repository_teams(
    Extension(ctx): Extension<AppContext>,
    RequestSignature(signature): RequestSignature,
    body: Bytes,
) -> AppResult<Json<RepositoryTeams>> {
    ctx.authenticator.verify_provisioning(&body, &signature)?;
    let request: QueryRepositoryTeams = parse_json(&body)?;
    ctx.authenticator.check_timestamp(request.timestamp)?;
    validate_repository(&request.repository)?;

    let teams = ctx
        .deadline()
        .run(
            "read repository teams",
            ctx.repository_teams.read(&request.repository),
        )
        .await?;
    Ok(Json(RepositoryTeams {
        repository: request.repository,
        teams,
    }))
}

fn validate_repository(repository: &str) -> AppResult<()> {
    if is_repository_name(repository) {
        Ok(())
    } else {
        Err(AppError::ValidationFailure(
            "repository must be in the format owner/name".into(),
        ))
    }
}
