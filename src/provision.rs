use axum::{body::Bytes, extract::Extension, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::context::AppContext;
use crate::crypto::generate_api_key;
use crate::error::{AppError, AppResult};
use crate::extractor::{parse_json, RequestSignature};
use crate::vault::KeyMaterial;

#[derive(Debug, Deserialize)]
pub struct ProvisionRequest {
    pub team: String,
    #[serde(default)]
    pub rotate: bool,
    pub timestamp: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionResponse {
    pub message: String,
    pub team: String,
    pub external_group_id: String,
    pub key: String,
}

/// Issues a new API key for a team. An existing valid key is only replaced
/// when the caller asks for rotation.
pub async fn provision(
    Extension(ctx): Extension<AppContext>,
    RequestSignature(signature): RequestSignature,
    body: Bytes,
) -> AppResult<(StatusCode, Json<ProvisionResponse>)> {
    ctx.authenticator.verify_provisioning(&body, &signature)?;
    let request: ProvisionRequest = parse_json(&body)?;
    ctx.authenticator.check_timestamp(request.timestamp)?;

    let team = request.team.trim();
    if team.is_empty() {
        return Err(AppError::ValidationFailure("team must be specified".into()));
    }

    let deadline = ctx.deadline();
    let external_group_id = deadline
        .run("resolve team", ctx.directory.external_group_id(team))
        .await?;

    if !request.rotate {
        match deadline
            .run("look up api keys", ctx.vault.lookup(team, &external_group_id))
            .await
        {
            Ok(_) => {
                warn!(%team, "refusing to replace a valid api key without rotate");
                return Err(AppError::Forbidden(
                    "team already has a valid API key; set rotate to replace it".into(),
                ));
            }
            Err(AppError::NotFound) => {}
            Err(err) => return Err(err),
        }
    }

    let key = KeyMaterial::new(generate_api_key());
    deadline
        .run(
            "rotate api key",
            ctx.vault.rotate(team, &external_group_id, &key),
        )
        .await?;
    info!(%team, %external_group_id, rotate = request.rotate, "api key provisioned");

    Ok((
        StatusCode::CREATED,
        Json(ProvisionResponse {
            message: "API key provisioned successfully".into(),
            team: team.to_string(),
            external_group_id,
            key: key.to_hex(),
        }),
    ))
}
