//! Refresh submissions.
//!
//! `GET|POST /api/refresh/:guild/:id` queues a sync-one job for `id`, or a
//! sync-all job when `id` is `all`. The response is sent as soon as the job
//! is queued.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use rolesync_core::{ChannelId, GuildId, JobKind, MemberId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use crate::telemetry::metrics::with_metrics;

pub const ALL_MEMBERS: &str = "all";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RefreshQuery {
    /// Channel to answer in when the member cannot be messaged directly.
    pub channel: Option<ChannelId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshResponse {
    pub queued: JobKind,
    pub guild_id: GuildId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity: Option<MemberId>,
}

/// GET|POST /api/refresh/:guild/:id
pub async fn refresh(
    State(state): State<Arc<AppState>>,
    Path((guild, id)): Path<(GuildId, String)>,
    Query(query): Query<RefreshQuery>,
) -> ApiResult<impl IntoResponse> {
    if state.ctx.role_map.guild(&guild).is_none() {
        return Err(ApiError::guild_not_found(&guild));
    }
    let submitter = &state.ctx.submitter;

    let (kind, identity, result) = if id == ALL_MEMBERS {
        let result = submitter.submit_sync_all(guild.clone()).await;
        (JobKind::SyncAll, None, result)
    } else {
        let identity = MemberId::from(id);
        let result = match query.channel {
            Some(channel) => {
                submitter
                    .submit_sync_one_with_reply(guild.clone(), identity.clone(), channel)
                    .await
            }
            None => submitter.submit_sync_one(guild.clone(), identity.clone()).await,
        };
        (JobKind::SyncOne, Some(identity), result)
    };

    let label = if kind == JobKind::SyncAll { "all" } else { "one" };
    with_metrics(|m| m.record_refresh(label, result.is_ok()));
    result?;

    tracing::info!(guild_id = %guild, kind = %kind, identity = ?identity, "Refresh queued");
    Ok((
        StatusCode::ACCEPTED,
        Json(RefreshResponse {
            queued: kind,
            guild_id: guild,
            identity,
        }),
    ))
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/:guild/:id", get(refresh).post(refresh))
        .with_state(state)
}
