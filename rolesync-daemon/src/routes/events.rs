//! Gateway event intake.
//!
//! The gateway bridge posts every event it receives here, in arrival order.
//! The live view is updated first so that a sync triggered by the event sees
//! current role metadata.

use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use rolesync_core::PlatformEvent;
use std::sync::Arc;

use crate::error::ApiResult;
use crate::state::AppState;
use crate::telemetry::metrics::with_metrics;

/// POST /api/events
pub async fn ingest_event(
    State(state): State<Arc<AppState>>,
    Json(event): Json<PlatformEvent>,
) -> ApiResult<StatusCode> {
    state.live.apply(&event);
    with_metrics(|m| m.record_event(event.name()));
    state.ingest.dispatch(event).await?;
    Ok(StatusCode::ACCEPTED)
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", post(ingest_event))
        .with_state(state)
}
