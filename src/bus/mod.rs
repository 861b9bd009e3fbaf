//! Asynchronous transport between the relay and cluster agents: a request
//! topic the relay produces to and a status topic it consumes from.

pub mod memory;
pub mod messages;
pub mod postgres;

use async_trait::async_trait;

pub use memory::{channel_bus, AgentEnd, ChannelPublisher, ChannelStatusSource};
pub use messages::{DeploymentRequest, DeploymentState, DeploymentStatusEvent, Envelope};
pub use postgres::{PgRequestPublisher, PgStatusSource};

use crate::error::{AppError, AppResult};

/// Producer side of the request topic. One call is one publish attempt;
/// retrying is the caller's decision.
#[async_trait]
pub trait RequestPublisher: Send + Sync {
    async fn publish(&self, request: &DeploymentRequest) -> AppResult<()>;
}

/// Consumer side of the status topic. Yields events in topic order; a
/// message that cannot be decoded is yielded as `EncodingFailure` so the
/// consumer can skip it. `None` means the topic is closed.
#[async_trait]
pub trait StatusSource: Send {
    async fn recv(&mut self) -> Option<AppResult<DeploymentStatusEvent>>;
}

pub fn encode_request(topic: &str, request: &DeploymentRequest) -> AppResult<Envelope> {
    let payload = serde_json::to_value(request)
        .map_err(|e| AppError::EncodingFailure(format!("encode deployment request: {e}")))?;
    Ok(Envelope {
        topic: topic.to_string(),
        key: request.correlation_id.clone(),
        payload,
    })
}

pub fn encode_status(topic: &str, event: &DeploymentStatusEvent) -> AppResult<Envelope> {
    let payload = serde_json::to_value(event)
        .map_err(|e| AppError::EncodingFailure(format!("encode deployment status: {e}")))?;
    Ok(Envelope {
        topic: topic.to_string(),
        key: event.correlation_id.clone(),
        payload,
    })
}

pub fn decode_status(payload: serde_json::Value) -> AppResult<DeploymentStatusEvent> {
    serde_json::from_value(payload)
        .map_err(|e| AppError::EncodingFailure(format!("decode deployment status: {e}")))
}

pub fn decode_request(payload: serde_json::Value) -> AppResult<DeploymentRequest> {
    serde_json::from_value(payload)
        .map_err(|e| AppError::EncodingFailure(format!("decode deployment request: {e}")))
}
