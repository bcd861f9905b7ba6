//! Shared application state for Axum routers.

use rolesync_engine::{AdminService, EngineContext, EventIngestor, GuildRegistry};
use std::sync::Arc;
use std::time::Instant;

use crate::gateway::LiveState;

/// Application-wide state shared across all routes.
#[derive(Clone)]
pub struct AppState {
    pub ctx: EngineContext,
    pub ingest: EventIngestor,
    pub admin: AdminService,
    /// Fed by `/api/events` before the ingest path sees the event.
    pub live: Arc<LiveState>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(ctx: EngineContext, registry: Arc<GuildRegistry>, live: Arc<LiveState>) -> Self {
        Self {
            ingest: EventIngestor::new(ctx.clone(), registry),
            admin: AdminService::new(ctx.clone()),
            ctx,
            live,
            start_time: Instant::now(),
        }
    }

    pub fn registry(&self) -> &Arc<GuildRegistry> {
        self.ingest.registry()
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("ctx", &self.ctx)
            .field("active_guilds", &self.registry().active_guilds().len())
            .finish_non_exhaustive()
    }
}
