use std::sync::Arc;

use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::{error, info};
use uuid::Uuid;

use crate::auth::AuthenticatedTeam;
use crate::bus::{DeploymentRequest, RequestPublisher};
use crate::correlator::CorrelatorHandle;
use crate::deadline::Deadline;
use crate::error::{AppError, AppResult};

static REPOSITORY_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_.-]+/[A-Za-z0-9_.-]+$").expect("valid regex"));

/// Deployment fields taken from an authenticated inbound request.
#[derive(Clone, Debug)]
pub struct DeploymentSubmission {
    pub repository: String,
    pub cluster: String,
    pub git_ref: String,
    pub environment: Option<String>,
    pub deployment_ref: Option<String>,
    pub payload: Value,
}

#[derive(Clone)]
pub struct Dispatcher {
    publisher: Arc<dyn RequestPublisher>,
    correlator: CorrelatorHandle,
}

impl Dispatcher {
    pub fn new(publisher: Arc<dyn RequestPublisher>, correlator: CorrelatorHandle) -> Self {
        Self {
            publisher,
            correlator,
        }
    }

    /// Validates `submission`, assigns a fresh correlation id and publishes
    /// the request once. `requestedAt` stays in the correlator ledger only
    /// when the publish succeeds. The team always comes from the authenticated
    /// identity, never from the submission.
    pub async fn dispatch(
        &self,
        identity: &AuthenticatedTeam,
        submission: DeploymentSubmission,
        signature: &[u8],
        deadline: Deadline,
    ) -> AppResult<DeploymentRequest> {
        validate(&submission)?;

        let request = DeploymentRequest {
            correlation_id: Uuid::new_v4().to_string(),
            repository: submission.repository,
            team: identity.team.clone(),
            cluster: submission.cluster,
            git_ref: submission.git_ref,
            environment: submission.environment,
            deployment_ref: submission.deployment_ref,
            payload: submission.payload,
            requested_at: Utc::now(),
            signature: hex::encode(signature),
        };

        // Tracked first: an agent may report a terminal status before
        // publish returns.
        self.correlator
            .track_request(&request.correlation_id, request.requested_at);
        if let Err(err) = deadline
            .run("publish deployment request", self.publisher.publish(&request))
            .await
        {
            self.correlator.forget_request(&request.correlation_id);
            error!(
                correlation_id = %request.correlation_id,
                repository = %request.repository,
                ?err,
                "failed to publish deployment request"
            );
            return Err(err);
        }

        info!(
            correlation_id = %request.correlation_id,
            team = %request.team,
            repository = %request.repository,
            cluster = %request.cluster,
            "deployment request dispatched"
        );
        Ok(request)
    }
}

/// True for `owner/name` repository names.
pub fn is_repository_name(repository: &str) -> bool {
    REPOSITORY_NAME.is_match(repository)
}

pub fn validate(submission: &DeploymentSubmission) -> AppResult<()> {
    if !is_repository_name(&submission.repository) {
        return Err(AppError::ValidationFailure(
            "repository must be in the format owner/name".into(),
        ));
    }
    if submission.cluster.trim().is_empty() {
        return Err(AppError::ValidationFailure("cluster must be specified".into()));
    }
    if submission.git_ref.trim().is_empty() {
        return Err(AppError::ValidationFailure("ref must be specified".into()));
    }
    if !submission.payload.is_object() {
        return Err(AppError::ValidationFailure(
            "payload must be a JSON object".into(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::channel_bus;
    use crate::correlator::Correlator;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::Mutex;

    fn identity() -> AuthenticatedTeam {
        AuthenticatedTeam {
            team: "acme".into(),
            external_group_id: "g1".into(),
        }
    }

    fn submission() -> DeploymentSubmission {
        DeploymentSubmission {
            repository: "acme/web".into(),
            cluster: "prod".into(),
            git_ref: "main".into(),
            environment: Some("production".into()),
            deployment_ref: Some("42".into()),
            payload: json!({"image": "web:1.2.3"}),
        }
    }

    #[tokio::test]
    async fn dispatch_assigns_fresh_correlation_ids() {
        let (publisher, mut agent, _) = channel_bus(8);
        let correlator = Correlator::new();
        let dispatcher = Dispatcher::new(Arc::new(publisher), correlator.handle());
        let deadline = Deadline::after(Duration::from_secs(5));

        let first = dispatcher
            .dispatch(&identity(), submission(), &[1, 2], deadline)
            .await
            .unwrap();
        let second = dispatcher
            .dispatch(&identity(), submission(), &[1, 2], deadline)
            .await
            .unwrap();
        assert_ne!(first.correlation_id, second.correlation_id);
        assert_eq!(first.signature, "0102");

        let (_, published) = agent.next_request().await.unwrap().unwrap();
        assert_eq!(published, first);
        assert!(correlator
            .handle()
            .requested_at(&first.correlation_id)
            .is_some());
    }

    #[tokio::test]
    async fn invalid_submissions_are_not_published() {
        let (publisher, mut agent, _) = channel_bus(8);
        let dispatcher = Dispatcher::new(Arc::new(publisher), Correlator::new().handle());
        let deadline = Deadline::after(Duration::from_secs(5));

        let mut bad_repo = submission();
        bad_repo.repository = "no-owner".into();
        let mut no_cluster = submission();
        no_cluster.cluster = " ".into();
        let mut bad_payload = submission();
        bad_payload.payload = json!([1, 2]);

        for candidate in [bad_repo, no_cluster, bad_payload] {
            let err = dispatcher
                .dispatch(&identity(), candidate, &[], deadline)
                .await
                .unwrap_err();
            assert!(matches!(err, AppError::ValidationFailure(_)));
        }
        assert!(agent.try_next_request().is_none());
    }

    #[tokio::test]
    async fn publish_failure_is_not_tracked() {
        let (publisher, agent, _) = channel_bus(8);
        drop(agent);
        let correlator = Correlator::new();
        let dispatcher = Dispatcher::new(Arc::new(publisher), correlator.handle());
        let err = dispatcher
            .dispatch(
                &identity(),
                submission(),
                &[],
                Deadline::after(Duration::from_secs(5)),
            )
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(correlator.handle().tracked_requests(), 0);
    }

    /// Records what the correlator ledger held at the moment of publishing.
    struct LedgerSnoopingPublisher {
        correlator: CorrelatorHandle,
        seen: Mutex<Vec<Option<DateTime<Utc>>>>,
    }

    #[async_trait]
    impl RequestPublisher for LedgerSnoopingPublisher {
        async fn publish(&self, request: &DeploymentRequest) -> AppResult<()> {
            let tracked = self.correlator.requested_at(&request.correlation_id);
            self.seen.lock().await.push(tracked);
            Ok(())
        }
    }

    #[tokio::test]
    async fn request_is_tracked_before_it_is_published() {
        let correlator = Correlator::new();
        let publisher = Arc::new(LedgerSnoopingPublisher {
            correlator: correlator.handle(),
            seen: Mutex::new(Vec::new()),
        });
        let dispatcher = Dispatcher::new(publisher.clone(), correlator.handle());

        let request = dispatcher
            .dispatch(
                &identity(),
                submission(),
                &[],
                Deadline::after(Duration::from_secs(5)),
            )
            .await
            .unwrap();
        assert_eq!(*publisher.seen.lock().await, vec![Some(request.requested_at)]);
    }
}
