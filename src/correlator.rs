//! Tracks every in-flight deployment from its first status event to a
//! terminal outcome and keeps cluster connectivity up to date.
//!
//! [`Correlator`] is the only writer of this state. It is moved into the
//! status consumer loop; everything else (the dispatcher, the status
//! endpoint) holds a [`CorrelatorHandle`] with read access plus the
//! request ledger used for lead time.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::RwLock;
use tokio::time;
use tracing::{debug, error, info, warn};

use crate::bus::{DeploymentState, DeploymentStatusEvent, StatusSource};
use crate::deadline::Deadline;
use crate::error::AppError;
use crate::status_bridge::StatusReporter;
use crate::telemetry;

/// Number of recently completed correlation ids remembered for
/// deduplication of redelivered events.
pub const TERMINATED_CAPACITY: usize = 10_000;

/// Ledger entries for requests that never reach a terminal state are
/// dropped after this many hours.
const LEDGER_RETENTION_HOURS: i64 = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Non-terminal event; the id is (still) in flight.
    Tracked,
    /// First terminal event; the id left the in-flight set.
    Completed,
    /// Event for an id that already completed. Nothing was recorded.
    Stale,
}

/// Result of applying one status event.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub state: DeploymentState,
    pub outcome: Outcome,
    pub lead_time: Option<Duration>,
    pub in_flight: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CorrelatorSnapshot {
    pub in_flight: Vec<String>,
    pub clusters: BTreeMap<String, bool>,
}

#[derive(Default)]
struct CorrelatorState {
    in_flight: HashSet<String>,
    terminated: HashSet<String>,
    terminated_order: VecDeque<String>,
    clusters: BTreeMap<String, bool>,
    last_seen: HashMap<String, DateTime<Utc>>,
}

impl CorrelatorState {
    fn remember_terminated(&mut self, correlation_id: &str, capacity: usize) {
        if !self.terminated.insert(correlation_id.to_string()) {
            return;
        }
        self.terminated_order.push_back(correlation_id.to_string());
        while self.terminated_order.len() > capacity {
            if let Some(evicted) = self.terminated_order.pop_front() {
                self.terminated.remove(&evicted);
            }
        }
    }
}

#[derive(Default)]
struct Shared {
    state: RwLock<CorrelatorState>,
    requested_at: DashMap<String, DateTime<Utc>>,
}

pub struct Correlator {
    shared: Arc<Shared>,
    terminated_capacity: usize,
}

impl Default for Correlator {
    fn default() -> Self {
        Self::new()
    }
}

impl Correlator {
    pub fn new() -> Self {
        Self::with_terminated_capacity(TERMINATED_CAPACITY)
    }

    pub fn with_terminated_capacity(terminated_capacity: usize) -> Self {
        Self {
            shared: Arc::new(Shared::default()),
            terminated_capacity,
        }
    }

    pub fn handle(&self) -> CorrelatorHandle {
        CorrelatorHandle {
            shared: self.shared.clone(),
        }
    }

    /// Applies one status event. Never fails: duplicate and out-of-order
    /// deliveries are absorbed.
    pub async fn process(&mut self, event: &DeploymentStatusEvent) -> Transition {
        let mut state = self.shared.state.write().await;

        if !event.cluster.is_empty() {
            state.last_seen.insert(event.cluster.clone(), Utc::now());
        }

        let id = event.correlation_id.as_str();
        if state.terminated.contains(id) {
            let in_flight = state.in_flight.len();
            drop(state);
            telemetry::set_queue_size(in_flight);
            debug!(
                correlation_id = id,
                state = event.state.as_str(),
                "ignoring status for completed deployment"
            );
            return Transition {
                state: event.state,
                outcome: Outcome::Stale,
                lead_time: None,
                in_flight,
            };
        }

        telemetry::record_state_transition(
            event.state.as_str(),
            &event.repository,
            &event.team,
            &event.cluster,
        );

        let mut lead_time = None;
        let outcome = if event.state.is_terminal() {
            state.in_flight.remove(id);
            state.remember_terminated(id, self.terminated_capacity);
            let requested_at = self.shared.requested_at.remove(id).map(|(_, at)| at);
            if event.state == DeploymentState::Success {
                lead_time = requested_at.and_then(|at| (event.occurred_at - at).to_std().ok());
                if let Some(elapsed) = lead_time {
                    telemetry::record_lead_time(
                        elapsed.as_secs_f64(),
                        event.state.as_str(),
                        &event.repository,
                        &event.team,
                        &event.cluster,
                    );
                }
            }
            Outcome::Completed
        } else {
            state.in_flight.insert(id.to_string());
            Outcome::Tracked
        };

        let in_flight = state.in_flight.len();
        drop(state);
        telemetry::set_queue_size(in_flight);
        debug!(
            correlation_id = id,
            state = event.state.as_str(),
            in_flight,
            "applied deployment status"
        );

        Transition {
            state: event.state,
            outcome,
            lead_time,
            in_flight,
        }
    }

    /// Marks every known cluster disconnected, then the listed ones
    /// connected, and republishes the whole gauge.
    pub async fn set_connected_clusters(&mut self, connected: &[String]) {
        let mut state = self.shared.state.write().await;
        for status in state.clusters.values_mut() {
            *status = false;
        }
        for cluster in connected {
            state.clusters.insert(cluster.clone(), true);
        }
        for (cluster, status) in &state.clusters {
            telemetry::set_cluster_status(cluster, *status);
        }
    }

    /// Recomputes connectivity from the clusters that reported within
    /// `window` of `now`. Returns the connected clusters.
    pub async fn refresh_connectivity(
        &mut self,
        now: DateTime<Utc>,
        window: Duration,
    ) -> Vec<String> {
        let mut connected: Vec<String> = {
            let state = self.shared.state.read().await;
            state
                .last_seen
                .iter()
                .filter(|(_, seen)| {
                    now.signed_duration_since(**seen)
                        .to_std()
                        .map_or(true, |age| age <= window)
                })
                .map(|(cluster, _)| cluster.clone())
                .collect()
        };
        connected.sort();
        self.set_connected_clusters(&connected).await;
        connected
    }

    /// Drops ledger entries older than the retention period.
    pub fn prune_ledger(&mut self, now: DateTime<Utc>) -> usize {
        let cutoff = now - chrono::Duration::hours(LEDGER_RETENTION_HOURS);
        let before = self.shared.requested_at.len();
        self.shared.requested_at.retain(|_, at| *at >= cutoff);
        before - self.shared.requested_at.len()
    }

    /// Consumes `source` until it closes. Each event is applied, then
    /// forwarded to `reporter` under its own deadline; connectivity is
    /// refreshed every `settings.refresh_interval`.
    pub async fn run<S>(
        mut self,
        mut source: S,
        reporter: Arc<dyn StatusReporter>,
        settings: ConsumerSettings,
    ) where
        S: StatusSource,
    {
        let mut ticker = time::interval(settings.refresh_interval);
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        info!("status consumer started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let now = Utc::now();
                    let connected = self.refresh_connectivity(now, settings.heartbeat_window).await;
                    let pruned = self.prune_ledger(now);
                    debug!(connected = connected.len(), pruned, "refreshed cluster connectivity");
                }
                received = source.recv() => {
                    match received {
                        Some(Ok(event)) => self.handle_event(&event, reporter.as_ref(), &settings).await,
                        Some(Err(AppError::EncodingFailure(detail))) => {
                            warn!(%detail, "skipping undecodable status message");
                        }
                        Some(Err(err)) => {
                            warn!(?err, "status topic unavailable");
                        }
                        None => {
                            info!("status topic closed; stopping consumer");
                            break;
                        }
                    }
                }
            }
        }
    }

    async fn handle_event(
        &mut self,
        event: &DeploymentStatusEvent,
        reporter: &dyn StatusReporter,
        settings: &ConsumerSettings,
    ) {
        let transition = self.process(event).await;
        if transition.outcome == Outcome::Stale {
            return;
        }

        let deadline = Deadline::after(settings.status_deadline);
        match reporter.report(event, deadline).await {
            Ok(()) => {}
            Err(AppError::ValidationFailure(detail)) => {
                warn!(
                    correlation_id = %event.correlation_id,
                    %detail,
                    "status not forwarded"
                );
            }
            Err(err) => {
                error!(
                    correlation_id = %event.correlation_id,
                    repository = %event.repository,
                    ?err,
                    "failed to forward deployment status"
                );
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ConsumerSettings {
    pub heartbeat_window: Duration,
    pub refresh_interval: Duration,
    pub status_deadline: Duration,
}

/// Shared, read-mostly view of a [`Correlator`].
#[derive(Clone)]
pub struct CorrelatorHandle {
    shared: Arc<Shared>,
}

impl CorrelatorHandle {
    /// Remembers when a request was accepted, for lead time on success.
    pub fn track_request(&self, correlation_id: &str, requested_at: DateTime<Utc>) {
        self.shared
            .requested_at
            .insert(correlation_id.to_string(), requested_at);
    }

    /// Drops the ledger entry of a request that was never published.
    pub fn forget_request(&self, correlation_id: &str) {
        self.shared.requested_at.remove(correlation_id);
    }

    pub fn requested_at(&self, correlation_id: &str) -> Option<DateTime<Utc>> {
        self.shared
            .requested_at
            .get(correlation_id)
            .map(|entry| *entry.value())
    }

    pub fn tracked_requests(&self) -> usize {
        self.shared.requested_at.len()
    }

    pub async fn is_in_flight(&self, correlation_id: &str) -> bool {
        self.shared
            .state
            .read()
            .await
            .in_flight
            .contains(correlation_id)
    }

    pub async fn in_flight_count(&self) -> usize {
        self.shared.state.read().await.in_flight.len()
    }

    /// Copies the in-flight set and cluster map under one read lock.
    pub async fn snapshot(&self) -> CorrelatorSnapshot {
        let state = self.shared.state.read().await;
        let mut in_flight: Vec<String> = state.in_flight.iter().cloned().collect();
        in_flight.sort();
        CorrelatorSnapshot {
            in_flight,
            clusters: state.clusters.clone(),
        }
    }
}
