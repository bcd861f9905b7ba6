//! Event Ingestion
//!
//! Translates platform events into direct cache mutations or Job Queue
//! submissions. Single-member changes go straight to the Cache Store under one
//! lock; anything that needs the datastore goes through the queue, except the
//! player-promotion path on member update.

use crate::context::EngineContext;
use crate::lifecycle::GuildRegistry;
use rolesync_core::{
    EngineError, GuildId, Job, Member, MemberChunk, MemberId, PlatformEvent, RoleSlug,
    GUILD_SERIES,
};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct EventIngestor {
    ctx: EngineContext,
    registry: Arc<GuildRegistry>,
}

impl EventIngestor {
    pub fn new(ctx: EngineContext, registry: Arc<GuildRegistry>) -> Self {
        Self { ctx, registry }
    }

    pub fn registry(&self) -> &Arc<GuildRegistry> {
        &self.registry
    }

    /// Route one event. Live-state events (presence, roles) are not cached
    /// here and are accepted as no-ops.
    pub async fn dispatch(&self, event: PlatformEvent) -> Result<(), EngineError> {
        tracing::trace!(event = event.name(), guild_id = %event.guild_id(), "Ingesting event");
        match event {
            PlatformEvent::GuildCreate {
                guild_id,
                name,
                unavailable,
                ..
            } => {
                self.guild_available(&guild_id, &name, unavailable).await;
            }
            PlatformEvent::GuildDelete { guild_id } => self.guild_unavailable(&guild_id),
            PlatformEvent::MemberAdd { guild_id, member } => {
                self.member_joined(&guild_id, member).await?;
            }
            PlatformEvent::MemberRemove {
                guild_id,
                member_id,
            } => self.member_left(&guild_id, &member_id),
            PlatformEvent::MemberUpdate { guild_id, member } => {
                self.member_updated(&guild_id, member).await;
            }
            PlatformEvent::MembersChunk { guild_id, members } => {
                self.members_chunk(&guild_id, members).await?;
            }
            PlatformEvent::PresenceUpdate { .. }
            | PlatformEvent::RoleUpsert { .. }
            | PlatformEvent::RoleDelete { .. } => {}
        }
        Ok(())
    }

    /// Begin serving a guild: empty its Membership Set, start a fresh
    /// enumeration, and (re)start its periodic tasks. Returns false when the
    /// guild was flagged unavailable and nothing was done.
    pub async fn guild_available(&self, guild: &GuildId, name: &str, unavailable: bool) -> bool {
        if unavailable {
            tracing::debug!(guild_id = %guild, "Ignoring unavailable guild");
            return false;
        }

        tracing::info!(guild_id = %guild, guild = %name, "Guild available");
        if self.ctx.role_map.guild(guild).is_none() {
            tracing::warn!(guild_id = %guild, "Guild has no role mapping; grants will be skipped");
        }

        self.ctx.cache.reset_membership(guild);
        self.ctx.accumulator.reset(guild);
        if let Err(e) = self.ctx.platform.request_full_membership(guild).await {
            tracing::error!(guild_id = %guild, error = %e, "Membership request failed");
        }
        self.registry.start(&self.ctx, guild, name);
        true
    }

    /// Stop serving a guild: cancel its tickers and drop its cached state.
    pub fn guild_unavailable(&self, guild: &GuildId) {
        let stopped = self.registry.stop(guild);
        self.ctx.cache.drop_guild(guild);
        self.ctx.accumulator.remove(guild);
        self.ctx.sink.retire(GUILD_SERIES, guild);
        tracing::info!(guild_id = %guild, tasks_stopped = stopped, "Guild unavailable");
    }

    pub async fn member_joined(&self, guild: &GuildId, member: Member) -> Result<(), EngineError> {
        let identity = member.id.clone();
        tracing::info!(
            guild_id = %guild,
            member_id = %identity,
            username = %member.username,
            "Member joined"
        );
        self.ctx.cache.upsert_member(guild, member);
        self.ctx
            .submitter
            .submit_sync_one(guild.clone(), identity)
            .await
    }

    pub fn member_left(&self, guild: &GuildId, identity: &MemberId) {
        let removed = self.ctx.cache.remove_member(guild, identity);
        tracing::info!(
            guild_id = %guild,
            member_id = %identity,
            was_cached = removed.is_some(),
            "Member left"
        );
    }

    /// Replace the cached member. When the member newly holds the guild's
    /// player role, mirror it into the datastore and welcome them.
    /// Returns whether a promotion happened.
    pub async fn member_updated(&self, guild: &GuildId, member: Member) -> bool {
        let identity = member.id.clone();
        let gained = match self.ctx.role_map.player_role(guild) {
            Some((slug, role)) => member.has_role(role).then(|| slug.clone()),
            None => None,
        };
        let previous = self.ctx.cache.upsert_member(guild, member);

        let Some(slug) = gained else {
            return false;
        };
        // A member missing from the cache had no roles we know of.
        let held_before = previous.is_some_and(|previous| {
            self.ctx
                .role_map
                .player_role(guild)
                .is_some_and(|(_, role)| previous.has_role(role))
        });
        if held_before {
            return false;
        }

        self.promote(guild, &identity, &slug).await;
        true
    }

    /// Mirror the player role into the datastore, then welcome the member.
    /// No message is sent unless the datastore accepted the grant.
    async fn promote(&self, guild: &GuildId, identity: &MemberId, slug: &RoleSlug) {
        tracing::info!(guild_id = %guild, member_id = %identity, slug = %slug, "Member promoted");

        let role = match self.ctx.datastore.role_by_slug(slug).await {
            Ok(role) => role,
            Err(e) => {
                tracing::error!(slug = %slug, error = %e, "Datastore role lookup failed");
                return;
            }
        };
        if let Err(e) = self.ctx.datastore.grant_role(identity, role.id).await {
            tracing::error!(
                member_id = %identity,
                slug = %slug,
                error = %e,
                "Failed to mirror promotion into datastore"
            );
            return;
        }

        self.ctx
            .send_to_member(identity, None, &self.ctx.config.messages.new_player)
            .await;
    }

    /// Queue one enumeration chunk. The chunk-size heuristic decides finality.
    pub async fn members_chunk(
        &self,
        guild: &GuildId,
        members: Vec<Member>,
    ) -> Result<(), EngineError> {
        let generation = self.ctx.accumulator.generation(guild);
        let chunk = MemberChunk::from_delivery(members, self.ctx.config.chunk_size, generation);
        tracing::debug!(
            guild_id = %guild,
            members = chunk.len(),
            generation,
            is_final = chunk.is_final,
            "Members chunk received"
        );
        self.ctx
            .submitter
            .submit(Job::bulk_enumerate(guild.clone(), chunk))
            .await
    }
}
