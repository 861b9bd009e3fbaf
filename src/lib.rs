pub mod auth;
pub mod bus;
pub mod config;
pub mod context;
pub mod correlator;
pub mod crypto;
pub mod db;
pub mod deadline;
pub mod deploy;
pub mod dispatcher;
pub mod error;
pub mod extractor;
pub mod provision;
pub mod repository_teams;
pub mod routes;
pub mod status_bridge;
pub mod teams;
pub mod telemetry;
pub mod vault;
