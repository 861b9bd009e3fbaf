use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Deployment states reported by cluster agents. The set is closed; an
/// unknown state fails to decode.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentState {
    Pending,
    Queued,
    InProgress,
    Inactive,
    Success,
    Error,
    Failure,
}

impl DeploymentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentState::Pending => "pending",
            DeploymentState::Queued => "queued",
            DeploymentState::InProgress => "in_progress",
            DeploymentState::Inactive => "inactive",
            DeploymentState::Success => "success",
            DeploymentState::Error => "error",
            DeploymentState::Failure => "failure",
        }
    }

    /// Success, error and failure end a deployment.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DeploymentState::Success | DeploymentState::Error | DeploymentState::Failure
        )
    }
}

/// Published on the request topic, keyed by correlation id.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentRequest {
    pub correlation_id: String,
    pub repository: String,
    pub team: String,
    pub cluster: String,
    #[serde(rename = "ref")]
    pub git_ref: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment_ref: Option<String>,
    pub payload: Value,
    pub requested_at: DateTime<Utc>,
    /// Hex signature the request was accepted with.
    pub signature: String,
}

/// Consumed from the status topic. Optional text fields default to empty.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentStatusEvent {
    pub correlation_id: String,
    pub state: DeploymentState,
    pub occurred_at: DateTime<Utc>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub deployment_ref: String,
    #[serde(default)]
    pub repository: String,
    #[serde(default)]
    pub team: String,
    #[serde(default)]
    pub cluster: String,
}

/// Transport unit on either topic.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    pub topic: String,
    pub key: String,
    pub payload: Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn status_event_decodes_with_missing_optional_fields() {
        let event: DeploymentStatusEvent = serde_json::from_value(json!({
            "correlationId": "abc",
            "state": "in_progress",
            "occurredAt": "2024-05-01T10:00:00Z",
        }))
        .unwrap();
        assert_eq!(event.state, DeploymentState::InProgress);
        assert!(event.deployment_ref.is_empty());
        assert!(!event.state.is_terminal());
    }

    #[test]
    fn unknown_state_is_rejected() {
        let decoded = serde_json::from_value::<DeploymentStatusEvent>(json!({
            "correlationId": "abc",
            "state": "exploded",
            "occurredAt": "2024-05-01T10:00:00Z",
        }));
        assert!(decoded.is_err());
    }

    #[test]
    fn terminal_states() {
        let terminal: Vec<_> = [
            DeploymentState::Pending,
            DeploymentState::Queued,
            DeploymentState::InProgress,
            DeploymentState::Inactive,
            DeploymentState::Success,
            DeploymentState::Error,
            DeploymentState::Failure,
        ]
        .into_iter()
        .filter(DeploymentState::is_terminal)
        .map(|state| state.as_str())
        .collect();
        assert_eq!(terminal, vec!["success", "error", "failure"]);
    }

    #[test]
    fn request_uses_ref_on_the_wire() {
        let request = DeploymentRequest {
            correlation_id: "c1".into(),
            repository: "acme/web".into(),
            team: "acme".into(),
            cluster: "prod".into(),
            git_ref: "main".into(),
            environment: None,
            deployment_ref: None,
            payload: json!({}),
            requested_at: Utc::now(),
            signature: "00".into(),
        };
        let wire = serde_json::to_value(&request).unwrap();
        assert_eq!(wire["ref"], "main");
        assert_eq!(wire["correlationId"], "c1");
        assert!(wire.get("environment").is_none());
    }
}
