#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use chrono::Utc;
use deploy_relay::auth::{sign, Authenticator, SIGNATURE_HEADER};
use deploy_relay::bus::{channel_bus, AgentEnd, ChannelStatusSource};
use deploy_relay::context::AppContext;
use deploy_relay::correlator::Correlator;
use deploy_relay::crypto::EncryptionKey;
use deploy_relay::dispatcher::Dispatcher;
use deploy_relay::routes;
use deploy_relay::teams::{MemoryRepositoryTeamStore, StaticTeamDirectory};
use deploy_relay::vault::{ApiKeyStore, MemoryApiKeyStore, Vault};
use serde_json::Value;
use tower::ServiceExt;

pub const PROVISION_KEY: &[u8] = b"provision-secret";

pub struct Harness {
    pub app: Router,
    pub vault: Vault,
    pub cipher: EncryptionKey,
    pub repository_teams: Arc<MemoryRepositoryTeamStore>,
    pub correlator: Correlator,
    pub agent: AgentEnd,
    pub statuses: ChannelStatusSource,
}

pub fn harness(store: Arc<dyn ApiKeyStore>, directory: StaticTeamDirectory) -> Harness {
    let cipher = EncryptionKey::generate();
    let vault = Vault::new(store, cipher.clone());
    let directory = Arc::new(directory);
    let authenticator = Authenticator::new(
        vault.clone(),
        directory.clone(),
        PROVISION_KEY.to_vec(),
        Duration::from_secs(30),
    );
    let (publisher, agent, statuses) = channel_bus(16);
    let correlator = Correlator::new();
    let repository_teams = Arc::new(MemoryRepositoryTeamStore::new());
    let context = AppContext {
        authenticator,
        vault: vault.clone(),
        directory,
        repository_teams: repository_teams.clone(),
        dispatcher: Dispatcher::new(Arc::new(publisher), correlator.handle()),
        correlator: correlator.handle(),
        request_budget: Duration::from_secs(5),
    };
    Harness {
        app: routes::app(context),
        vault,
        cipher,
        repository_teams,
        correlator,
        agent,
        statuses,
    }
}

pub fn memory_harness() -> (Harness, Arc<MemoryApiKeyStore>) {
    let store = Arc::new(MemoryApiKeyStore::new());
    let directory = StaticTeamDirectory::default()
        .with_team("acme", "g1")
        .with_team("globex", "g2");
    (harness(store.clone(), directory), store)
}

pub fn now() -> i64 {
    Utc::now().timestamp()
}

/// POSTs `body` with a signature header over it made with `key`.
pub async fn post_signed(app: &Router, uri: &str, body: &[u8], key: &[u8]) -> (StatusCode, Value) {
    post_with_signature(app, uri, body, &hex::encode(sign(body, key))).await
}

pub async fn post_with_signature(
    app: &Router,
    uri: &str,
    body: &[u8],
    signature: &str,
) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .header(SIGNATURE_HEADER, signature)
        .body(Body::from(body.to_vec()))
        .unwrap();
    send(app, request).await
}

pub async fn get(app: &Router, uri: &str) -> (StatusCode, Value) {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    send(app, request).await
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}
