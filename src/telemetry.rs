//! Prometheus metrics for the deployment pipeline.
//!
//! The recorder is installed by the `axum-prometheus` layer in `main`; the
//! helpers below are no-ops until then, which keeps unit tests free of any
//! global setup.

use std::time::Instant;

use metrics::{
    counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram,
};

pub const DATABASE_QUERIES: &str = "deployment_relay_database_queries_seconds";
pub const STATUS_API_REQUESTS: &str = "deployment_relay_status_api_requests_total";
pub const STATE_TRANSITIONS: &str = "deployment_relay_state_transitions_total";
pub const QUEUE_SIZE: &str = "deployment_relay_queue_size";
pub const LEAD_TIME: &str = "deployment_relay_lead_time_seconds";
pub const CLUSTER_STATUS: &str = "deployment_relay_cluster_status";

pub const STATUS_OK: &str = "ok";
pub const STATUS_ERROR: &str = "error";

pub fn describe_metrics() {
    describe_histogram!(DATABASE_QUERIES, "time to execute database queries");
    describe_counter!(STATUS_API_REQUESTS, "number of external status API requests made");
    describe_counter!(STATE_TRANSITIONS, "deployment state transitions");
    describe_gauge!(QUEUE_SIZE, "number of unfinished deployments");
    describe_histogram!(
        LEAD_TIME,
        "the time from a deployment request until it is running in the cluster"
    );
    describe_gauge!(CLUSTER_STATUS, "0 if cluster is down, 1 if cluster is up");
}

/// Observes the latency of one store query, labelled by outcome.
pub fn record_database_query<T, E>(started: Instant, result: &Result<T, E>) {
    let status = if result.is_ok() { STATUS_OK } else { STATUS_ERROR };
    histogram!(
        DATABASE_QUERIES,
        started.elapsed().as_secs_f64(),
        "status" => status
    );
}

/// `status_code` is `0` when the request never produced a response.
pub fn record_status_api_request(status_code: u16, repository: &str, team: &str) {
    counter!(
        STATUS_API_REQUESTS,
        1,
        "status_code" => status_code.to_string(),
        "repository" => repository.to_string(),
        "team" => team.to_string()
    );
}

pub fn record_state_transition(state: &'static str, repository: &str, team: &str, cluster: &str) {
    counter!(
        STATE_TRANSITIONS,
        1,
        "deployment_state" => state,
        "repository" => repository.to_string(),
        "team" => team.to_string(),
        "cluster" => cluster.to_string()
    );
}

pub fn record_lead_time(
    seconds: f64,
    state: &'static str,
    repository: &str,
    team: &str,
    cluster: &str,
) {
    histogram!(
        LEAD_TIME,
        seconds,
        "deployment_state" => state,
        "repository" => repository.to_string(),
        "team" => team.to_string(),
        "cluster" => cluster.to_string()
    );
}

pub fn set_queue_size(size: usize) {
    gauge!(QUEUE_SIZE, size as f64);
}

pub fn set_cluster_status(cluster: &str, connected: bool) {
    gauge!(
        CLUSTER_STATUS,
        if connected { 1.0 } else { 0.0 },
        "cluster" => cluster.to_string()
    );
}
