use async_trait::async_trait;
use tokio::sync::mpsc::{channel, error::TrySendError, Receiver, Sender};

use super::messages::{DeploymentRequest, DeploymentStatusEvent, Envelope};
use super::{
    decode_request, decode_status, encode_request, encode_status, RequestPublisher, StatusSource,
};
use crate::error::{AppError, AppResult};

const REQUEST_TOPIC: &str = "deploymentRequest";
const STATUS_TOPIC: &str = "deploymentStatus";

/// In-process bus over bounded channels. Returns the relay's publisher, the
/// agent's end of both topics, and the relay's status source.
pub fn channel_bus(capacity: usize) -> (ChannelPublisher, AgentEnd, ChannelStatusSource) {
    let (request_tx, request_rx) = channel(capacity);
    let (status_tx, status_rx) = channel(capacity);
    (
        ChannelPublisher { tx: request_tx },
        AgentEnd {
            requests: request_rx,
            statuses: status_tx,
        },
        ChannelStatusSource { rx: status_rx },
    )
}

#[derive(Clone)]
pub struct ChannelPublisher {
    tx: Sender<Envelope>,
}

#[async_trait]
impl RequestPublisher for ChannelPublisher {
    async fn publish(&self, request: &DeploymentRequest) -> AppResult<()> {
        let envelope = encode_request(REQUEST_TOPIC, request)?;
        self.tx.try_send(envelope).map_err(|err| match err {
            TrySendError::Full(_) => AppError::InfraFailure("request topic is full".into()),
            TrySendError::Closed(_) => AppError::InfraFailure("request topic is closed".into()),
        })
    }
}

pub struct ChannelStatusSource {
    rx: Receiver<Envelope>,
}

#[async_trait]
impl StatusSource for ChannelStatusSource {
    async fn recv(&mut self) -> Option<AppResult<DeploymentStatusEvent>> {
        let envelope = self.rx.recv().await?;
        Some(decode_status(envelope.payload))
    }
}

/// What a cluster agent sees: incoming requests and a way to report status.
pub struct AgentEnd {
    requests: Receiver<Envelope>,
    statuses: Sender<Envelope>,
}

impl AgentEnd {
    pub async fn next_request(&mut self) -> Option<AppResult<(String, DeploymentRequest)>> {
        let envelope = self.requests.recv().await?;
        Some(decode_request(envelope.payload).map(|request| (envelope.key, request)))
    }

    pub fn try_next_request(&mut self) -> Option<DeploymentRequest> {
        let envelope = self.requests.try_recv().ok()?;
        decode_request(envelope.payload).ok()
    }

    pub async fn report(&self, event: &DeploymentStatusEvent) -> AppResult<()> {
        let envelope = encode_status(STATUS_TOPIC, event)?;
        self.send_raw(envelope).await
    }

    pub async fn send_raw(&self, envelope: Envelope) -> AppResult<()> {
        self.statuses
            .send(envelope)
            .await
            .map_err(|_| AppError::InfraFailure("status topic is closed".into()))
    }
}
