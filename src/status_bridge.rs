use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};
use url::Url;

use crate::bus::DeploymentStatusEvent;
use crate::deadline::Deadline;
use crate::error::{AppError, AppResult};
use crate::telemetry;

/// Longest description the status API accepts, in characters.
pub const MAX_DESCRIPTION_LEN: usize = 140;

/// Forwards a deployment status to wherever it is reported externally.
#[async_trait]
pub trait StatusReporter: Send + Sync {
    async fn report(&self, event: &DeploymentStatusEvent, deadline: Deadline) -> AppResult<()>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusPayload {
    pub state: &'static str,
    pub description: String,
    pub log_url: String,
}

/// A status update ready to be sent for one deployment.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusUpdate {
    pub owner: String,
    pub name: String,
    pub deployment_ref: String,
    pub payload: StatusPayload,
}

/// Keeps at most `max` characters of `description`.
pub fn truncate_description(description: &str, max: usize) -> String {
    match description.char_indices().nth(max) {
        Some((cut, _)) => description[..cut].to_string(),
        None => description.to_string(),
    }
}

/// Reference to the relay's logs for one correlation id at one instant.
pub fn reference_url(base: &Url, correlation_id: &str, posted_at: DateTime<Utc>) -> Url {
    let mut url = base.clone();
    url.path_segments_mut()
        .map(|mut segments| {
            segments.pop_if_empty().push("logs");
        })
        .ok();
    url.query_pairs_mut()
        .clear()
        .append_pair("delivery_id", correlation_id)
        .append_pair("ts", &posted_at.timestamp().to_string());
    url
}

/// Builds the update for `event`. Fails without side effects when the
/// event lacks the deployment or repository it belongs to.
pub fn build_update(
    event: &DeploymentStatusEvent,
    log_base: &Url,
    posted_at: DateTime<Utc>,
) -> AppResult<StatusUpdate> {
    if event.deployment_ref.trim().is_empty() {
        return Err(AppError::ValidationFailure(
            "status event has no deployment reference".into(),
        ));
    }
    if event.repository.trim().is_empty() {
        return Err(AppError::ValidationFailure(
            "status event has no repository".into(),
        ));
    }
    let (owner, name) = event
        .repository
        .split_once('/')
        .filter(|(owner, name)| !owner.is_empty() && !name.is_empty() && !name.contains('/'))
        .ok_or_else(|| {
            AppError::ValidationFailure("repository must be in the format owner/name".into())
        })?;

    Ok(StatusUpdate {
        owner: owner.to_string(),
        name: name.to_string(),
        deployment_ref: event.deployment_ref.clone(),
        payload: StatusPayload {
            state: event.state.as_str(),
            description: truncate_description(&event.description, MAX_DESCRIPTION_LEN),
            log_url: reference_url(log_base, &event.correlation_id, posted_at).to_string(),
        },
    })
}

/// Posts deployment statuses to a GitHub-compatible API.
#[derive(Clone)]
pub struct StatusBridge {
    client: reqwest::Client,
    api_base: String,
    log_base: Url,
    token: Option<String>,
}

impl StatusBridge {
    pub fn new(
        api_base: impl Into<String>,
        log_base: &str,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("deploy-relay/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build status API client")?;
        let log_base =
            Url::parse(log_base).with_context(|| format!("invalid log base url {log_base}"))?;
        Ok(Self {
            client,
            api_base: api_base.into(),
            log_base,
            token,
        })
    }

    fn endpoint(&self, update: &StatusUpdate) -> String {
        format!(
            "{}/repos/{}/{}/deployments/{}/statuses",
            self.api_base.trim_end_matches('/'),
            update.owner,
            update.name,
            update.deployment_ref
        )
    }

    fn auth(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if let Some(token) = &self.token {
            request.bearer_auth(token)
        } else {
            request
        }
    }

    async fn post(&self, event: &DeploymentStatusEvent, update: &StatusUpdate) -> AppResult<()> {
        let request = self
            .auth(self.client.post(self.endpoint(update)))
            .header("Accept", "application/vnd.github+json")
            .json(&update.payload);

        let response = match request.send().await {
            Ok(response) => response,
            Err(err) => {
                telemetry::record_status_api_request(0, &event.repository, &event.team);
                return Err(err.into());
            }
        };
        let status = response.status();
        telemetry::record_status_api_request(status.as_u16(), &event.repository, &event.team);
        if !status.is_success() {
            warn!(
                correlation_id = %event.correlation_id,
                repository = %event.repository,
                status = status.as_u16(),
                "status API rejected update"
            );
            return Err(AppError::InfraFailure(format!(
                "status API responded with {status}"
            )));
        }
        debug!(
            correlation_id = %event.correlation_id,
            state = update.payload.state,
            "posted deployment status"
        );
        Ok(())
    }
}

#[async_trait]
impl StatusReporter for StatusBridge {
    async fn report(&self, event: &DeploymentStatusEvent, deadline: Deadline) -> AppResult<()> {
        let update = build_update(event, &self.log_base, Utc::now())?;
        deadline
            .run("post deployment status", self.post(event, &update))
            .await
    }
}
