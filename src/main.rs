use std::net::SocketAddr;
use std::sync::Arc;

use axum::{routing::get, Router};
use axum_prometheus::PrometheusMetricLayer;
use deploy_relay::auth::Authenticator;
use deploy_relay::bus::{PgRequestPublisher, PgStatusSource};
use deploy_relay::context::AppContext;
use deploy_relay::correlator::{ConsumerSettings, Correlator};
use deploy_relay::dispatcher::Dispatcher;
use deploy_relay::status_bridge::StatusBridge;
use deploy_relay::teams::{PgRepositoryTeamStore, StaticTeamDirectory};
use deploy_relay::vault::{PgApiKeyStore, Vault};
use deploy_relay::{config, db, routes, telemetry};
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    dotenvy::dotenv().ok();
    // Fail fast if either secret is missing
    let encryption_key = (*config::ENCRYPTION_KEY).clone();
    let provision_key = (*config::PROVISION_KEY).clone();

    // The recorder must be installed before anything records
    let (prometheus_layer, metrics_handle) = PrometheusMetricLayer::pair();
    telemetry::describe_metrics();

    let pool = db::connect(config::DATABASE_URL.as_str(), *config::DATABASE_MAX_CONNECTIONS).await?;

    match db::migrate(&pool).await {
        Ok(applied) => tracing::info!(applied, "database schema up to date"),
        Err(error) if *config::ALLOW_MIGRATION_FAILURE => {
            tracing::warn!(
                ?error,
                "Database migrations failed but continuing due to ALLOW_MIGRATION_FAILURE"
            );
        }
        Err(error) => return Err(Box::new(error) as Box<dyn std::error::Error>),
    }

    let vault = Vault::new(Arc::new(PgApiKeyStore::new(pool.clone())), encryption_key);
    let directory = Arc::new(StaticTeamDirectory::new((*config::TEAM_DIRECTORY).clone()));
    let authenticator = Authenticator::new(
        vault.clone(),
        directory.clone(),
        provision_key,
        *config::SIGNATURE_MAX_SKEW,
    );

    let correlator = Correlator::new();
    let correlator_handle = correlator.handle();
    let publisher = PgRequestPublisher::new(pool.clone(), config::BUS_REQUEST_TOPIC.as_str());
    let dispatcher = Dispatcher::new(Arc::new(publisher), correlator_handle.clone());

    let bridge = StatusBridge::new(
        config::STATUS_API_BASE_URL.as_str(),
        config::STATUS_LOG_BASE_URL.as_str(),
        (*config::STATUS_API_TOKEN).clone(),
        *config::STATUS_API_DEADLINE,
    )?;
    let source = PgStatusSource::new(
        pool.clone(),
        config::BUS_STATUS_TOPIC.as_str(),
        config::BUS_CONSUMER_ID.as_str(),
        *config::BUS_POLL_INTERVAL,
    )
    .with_poll_deadline(*config::BUS_POLL_DEADLINE);
    let settings = ConsumerSettings {
        heartbeat_window: *config::CLUSTER_HEARTBEAT_WINDOW,
        refresh_interval: *config::CLUSTER_REFRESH_INTERVAL,
        status_deadline: *config::STATUS_API_DEADLINE,
    };
    tokio::spawn(correlator.run(source, Arc::new(bridge), settings));

    let context = AppContext {
        authenticator,
        vault,
        directory,
        repository_teams: Arc::new(PgRepositoryTeamStore::new(pool.clone())),
        dispatcher,
        correlator: correlator_handle,
        request_budget: *config::REQUEST_DEADLINE,
    };

    let app = Router::new()
        .route(
            "/metrics",
            get(move || async move { metrics_handle.render() }),
        )
        .merge(routes::app(context))
        .layer(prometheus_layer);

    let addr: SocketAddr = format!("{}:{}", config::BIND_ADDRESS.as_str(), *config::BIND_PORT)
        .parse()
        .map_err(|error| Box::new(error) as Box<dyn std::error::Error>)?;
    tracing::info!(%addr, "Listening for incoming connections");
    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await?;

    Ok(())
}
