use axum::{
    extract::Extension,
    routing::{get, post},
    Json, Router,
};

use crate::context::AppContext;
use crate::correlator::CorrelatorSnapshot;
use crate::{deploy, provision, repository_teams};

pub async fn root() -> &'static str {
    "Deploy Relay API"
}

async fn status(Extension(ctx): Extension<AppContext>) -> Json<CorrelatorSnapshot> {
    Json(ctx.correlator.snapshot().await)
}

pub fn api_routes() -> Router {
    Router::new()
        .route("/api/v1/provision", post(provision::provision))
        .route("/api/v1/deploy", post(deploy::deploy))
        .route(
            "/api/v1/repository-teams",
            post(repository_teams::write_repository_teams),
        )
        .route(
            "/api/v1/repository-teams/query",
            post(repository_teams::query_repository_teams),
        )
        .route("/api/v1/status", get(status))
}

/// Root and API routes with `context` installed. Metrics are added by the
/// binary, which owns the global recorder.
pub fn app(context: AppContext) -> Router {
    Router::new()
        .route("/", get(root))
        .merge(api_routes())
        .layer(Extension(context))
}
