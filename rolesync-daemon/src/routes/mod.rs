//! HTTP routes.
//!
//! - `/api/refresh` - queue role refreshes
//! - `/api/events`  - gateway bridge event intake
//! - `/api/admin`   - privileged admin operations
//! - `/health`      - liveness and readiness
//! - `/metrics`     - Prometheus exposition

pub mod admin;
pub mod events;
pub mod health;
pub mod refresh;

use axum::{routing::get, Router};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::state::AppState;
use crate::telemetry::metrics_handler;

pub fn create_app_router(state: Arc<AppState>) -> Router {
    let submitter = state.ctx.submitter.clone();
    let health_state = health::HealthState {
        datastore: state.ctx.datastore.clone(),
        queue_depth: Arc::new(move || submitter.len()),
        start_time: state.start_time,
    };

    Router::new()
        .nest("/api/refresh", refresh::create_router(state.clone()))
        .nest("/api/events", events::create_router(state.clone()))
        .nest("/api/admin", admin::create_router(state))
        .nest("/health", health::create_router(health_state))
        .route("/metrics", get(metrics_handler))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
}
