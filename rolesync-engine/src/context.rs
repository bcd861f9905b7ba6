//! Shared state handed to the worker, samplers, ingest and admin paths.

use crate::accumulator::ChunkAccumulator;
use crate::cache::CacheStore;
use crate::config::EngineConfig;
use crate::queue::JobSubmitter;
use rolesync_core::{ChannelId, Datastore, MemberId, MetricsSink, PlatformClient, RoleMap};
use std::sync::Arc;

#[derive(Clone)]
pub struct EngineContext {
    pub cache: Arc<CacheStore>,
    pub accumulator: Arc<ChunkAccumulator>,
    /// Immutable after startup.
    pub role_map: Arc<RoleMap>,
    pub datastore: Arc<dyn Datastore>,
    pub platform: Arc<dyn PlatformClient>,
    pub sink: Arc<dyn MetricsSink>,
    pub submitter: JobSubmitter,
    pub config: Arc<EngineConfig>,
}

impl EngineContext {
    pub fn new(
        role_map: RoleMap,
        datastore: Arc<dyn Datastore>,
        platform: Arc<dyn PlatformClient>,
        sink: Arc<dyn MetricsSink>,
        submitter: JobSubmitter,
        config: EngineConfig,
    ) -> Self {
        Self {
            cache: Arc::new(CacheStore::new()),
            accumulator: Arc::new(ChunkAccumulator::new()),
            role_map: Arc::new(role_map),
            datastore,
            platform,
            sink,
            submitter,
            config: Arc::new(config),
        }
    }

    /// Send `text` to a member by direct message, falling back to `fallback`
    /// when the DM cannot be delivered. Failures are logged only.
    pub async fn send_to_member(
        &self,
        member: &MemberId,
        fallback: Option<&ChannelId>,
        text: &str,
    ) -> bool {
        let dm_error = match self.platform.send_direct_message(member, text).await {
            Ok(()) => return true,
            Err(e) => e,
        };

        let Some(channel) = fallback else {
            tracing::warn!(
                member_id = %member,
                error = %dm_error,
                "Direct message failed and no reply channel was given"
            );
            return false;
        };

        match self.platform.send_channel_message(channel, text).await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(
                    member_id = %member,
                    channel_id = %channel,
                    error = %e,
                    "Failed to deliver message"
                );
                false
            }
        }
    }
}

impl std::fmt::Debug for EngineContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineContext")
            .field("guilds", &self.role_map.len())
            .field("queued", &self.submitter.len())
            .finish_non_exhaustive()
    }
}
