//! Admin REST API.
//!
//! Every endpoint names the calling member and is refused unless the caller
//! holds one of the guild's privileged roles in the Membership Set. The
//! stats lookup is the exception: any caller may read hero stats.

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use rolesync_core::{
    AccountSummary, GuildId, HeroStats, IdentityQuery, Member, MemberId, RoleId, RoleSlug,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

// ============================================================================
// REQUEST / RESPONSE TYPES
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct SyncRoleRequest {
    pub caller: MemberId,
    pub slug: RoleSlug,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRoleResponse {
    pub slug: RoleSlug,
    pub granted: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemovePlayerRequest {
    pub caller: MemberId,
    /// `TYPE:KEY` or a mention.
    pub query: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemovePlayerResponse {
    pub removed: MemberId,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckParams {
    pub caller: MemberId,
    pub query: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatsParams {
    pub caller: MemberId,
    /// `TYPE:KEY` or a mention. The caller's own account when absent.
    #[serde(default)]
    pub query: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsResponse {
    pub heroes: Vec<HeroStats>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallerParams {
    pub caller: MemberId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembersResponse {
    pub role_id: RoleId,
    pub count: usize,
    pub members: Vec<Member>,
}

fn parse_query(raw: &str) -> ApiResult<IdentityQuery> {
    raw.parse::<IdentityQuery>().map_err(ApiError::from)
}

// ============================================================================
// HANDLERS
// ============================================================================

/// POST /api/admin/:guild/sync-role
pub async fn sync_role(
    State(state): State<Arc<AppState>>,
    Path(guild): Path<GuildId>,
    Json(req): Json<SyncRoleRequest>,
) -> ApiResult<Json<SyncRoleResponse>> {
    state.admin.authorize(&guild, &req.caller)?;
    let granted = state.admin.sync_role_to_datastore(&guild, &req.slug).await?;
    Ok(Json(SyncRoleResponse {
        slug: req.slug,
        granted,
    }))
}

/// POST /api/admin/:guild/remove-player
pub async fn remove_player(
    State(state): State<Arc<AppState>>,
    Path(guild): Path<GuildId>,
    Json(req): Json<RemovePlayerRequest>,
) -> ApiResult<Json<RemovePlayerResponse>> {
    state.admin.authorize(&guild, &req.caller)?;
    let query = parse_query(&req.query)?;
    let removed = state.admin.remove_player(&guild, &query).await?;
    Ok(Json(RemovePlayerResponse { removed }))
}

/// GET /api/admin/:guild/check?caller=..&query=..
pub async fn check_account(
    State(state): State<Arc<AppState>>,
    Path(guild): Path<GuildId>,
    Query(params): Query<CheckParams>,
) -> ApiResult<Json<AccountSummary>> {
    state.admin.authorize(&guild, &params.caller)?;
    let query = parse_query(&params.query)?;
    let summary = state.admin.lookup_account(&query).await?;
    Ok(Json(summary))
}

/// GET /api/admin/:guild/stats?caller=..[&query=..]
pub async fn hero_stats(
    State(state): State<Arc<AppState>>,
    Path(guild): Path<GuildId>,
    Query(params): Query<StatsParams>,
) -> ApiResult<Json<StatsResponse>> {
    state.admin.require_guild(&guild)?;
    let query = match params.query.as_deref().map(str::trim) {
        Some(raw) if !raw.is_empty() => parse_query(raw)?,
        _ => IdentityQuery::Mention(params.caller),
    };
    let heroes = state.admin.hero_stats(&query).await?;
    Ok(Json(StatsResponse { heroes }))
}

/// GET /api/admin/:guild/members/:role?caller=..
pub async fn members_with_role(
    State(state): State<Arc<AppState>>,
    Path((guild, role_id)): Path<(GuildId, RoleId)>,
    Query(params): Query<CallerParams>,
) -> ApiResult<Json<MembersResponse>> {
    state.admin.authorize(&guild, &params.caller)?;
    let mut members = state.admin.members_with_role(&guild, &role_id);
    members.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(Json(MembersResponse {
        role_id,
        count: members.len(),
        members,
    }))
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/:guild/sync-role", post(sync_role))
        .route("/:guild/remove-player", post(remove_player))
        .route("/:guild/check", get(check_account))
        .route("/:guild/stats", get(hero_stats))
        .route("/:guild/members/:role", get(members_with_role))
        .with_state(state)
}
