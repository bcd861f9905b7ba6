//! rolesync daemon
//!
//! Wires the engine to its real collaborators: PostgreSQL for the account
//! datastore, the Discord REST API plus a gateway bridge for the platform,
//! and Prometheus for metrics. Exposes the refresh, event intake, admin,
//! health and metrics endpoints over HTTP.

pub mod config;
pub mod db;
pub mod discord;
pub mod error;
pub mod gateway;
pub mod routes;
pub mod state;
pub mod telemetry;

pub use config::{DaemonConfig, LogFormat};
pub use db::{DbConfig, PgDatastore};
pub use discord::DiscordClient;
pub use error::{ApiError, ApiResult, ErrorCode};
pub use gateway::{gateway_channel, GatewayCommand, GatewayForwarder, LiveState};
pub use routes::create_app_router;
pub use state::AppState;
pub use telemetry::{init_tracing, metrics_handler, ProcFsProbe, PrometheusSink};
