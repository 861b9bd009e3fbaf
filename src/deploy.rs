use axum::{body::Bytes, extract::Extension, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use crate::auth::AuthenticatedTeam;
use crate::context::AppContext;
use crate::deadline::Deadline;
use crate::dispatcher::DeploymentSubmission;
use crate::error::{AppError, AppResult};
use crate::extractor::{parse_json, RequestSignature};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployRequest {
    pub team: String,
    pub cluster: String,
    pub repository: String,
    #[serde(rename = "ref")]
    pub git_ref: String,
    #[serde(default)]
    pub environment: Option<String>,
    #[serde(default)]
    pub deployment_ref: Option<String>,
    #[serde(default = "empty_payload")]
    pub payload: Value,
    pub timestamp: i64,
}

fn empty_payload() -> Value {
    Value::Object(Map::new())
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployResponse {
    pub message: String,
    pub correlation_id: String,
}

/// Accepts a signed deployment request from a team and puts it on the bus.
pub async fn deploy(
    Extension(ctx): Extension<AppContext>,
    RequestSignature(signature): RequestSignature,
    body: Bytes,
) -> AppResult<(StatusCode, Json<DeployResponse>)> {
    let request: DeployRequest = parse_json(&body)?;
    let deadline = ctx.deadline();

    let identity = deadline
        .run(
            "authenticate request",
            ctx.authenticator
                .authenticate_team(&request.team, &body, &signature, request.timestamp),
        )
        .await?;
    authorize_repository(&ctx, &identity, &request.repository, deadline).await?;

    let submission = DeploymentSubmission {
        repository: request.repository,
        cluster: request.cluster,
        git_ref: request.git_ref,
        environment: request.environment,
        deployment_ref: request.deployment_ref,
        payload: request.payload,
    };
    let dispatched = ctx
        .dispatcher
        .dispatch(&identity, submission, &signature, deadline)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(DeployResponse {
            message: "deployment request accepted".into(),
            correlation_id: dispatched.correlation_id,
        }),
    ))
}

/// Repositories with a legacy team mapping may only be deployed by the
/// teams listed there. Unmapped repositories are open to any team.
async fn authorize_repository(
    ctx: &AppContext,
    identity: &AuthenticatedTeam,
    repository: &str,
    deadline: Deadline,
) -> AppResult<()> {
    match deadline
        .run("read repository teams", ctx.repository_teams.read(repository))
        .await
    {
        Ok(teams) if teams.iter().any(|team| *team == identity.team) => Ok(()),
        Ok(_) => {
            warn!(team = %identity.team, %repository, "team is not allowed to deploy repository");
            Err(AppError::AuthenticationFailure)
        }
        Err(AppError::NotFound) => Ok(()),
        Err(err) => Err(err),
    }
}
