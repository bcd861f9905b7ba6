//! Platform events delivered to the ingest path.
//!
//! These are produced by whatever owns the platform session (the gateway
//! bridge) and posted to the daemon as JSON.

use crate::entities::{Member, Presence, RoleInfo};
use crate::identity::{GuildId, MemberId, RoleId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PlatformEvent {
    // ========================================================================
    // GUILD EVENTS
    // ========================================================================
    /// The process joined a guild, or a guild came back from an outage.
    GuildCreate {
        guild_id: GuildId,
        name: String,
        /// Set while the platform reports the guild as down.
        #[serde(default)]
        unavailable: bool,
        #[serde(default)]
        roles: Vec<RoleInfo>,
        #[serde(default)]
        presences: Vec<Presence>,
    },

    /// The guild went away: outage, kick, or deletion.
    GuildDelete { guild_id: GuildId },

    // ========================================================================
    // MEMBER EVENTS
    // ========================================================================
    MemberAdd { guild_id: GuildId, member: Member },

    MemberRemove {
        guild_id: GuildId,
        member_id: MemberId,
    },

    MemberUpdate { guild_id: GuildId, member: Member },

    /// One chunk of a requested member enumeration.
    MembersChunk {
        guild_id: GuildId,
        members: Vec<Member>,
    },

    // ========================================================================
    // LIVE STATE EVENTS
    // ========================================================================
    /// Only feeds the live platform state; the Presence Set is rebuilt per job.
    PresenceUpdate {
        guild_id: GuildId,
        presence: Presence,
    },

    RoleUpsert { guild_id: GuildId, role: RoleInfo },

    RoleDelete { guild_id: GuildId, role_id: RoleId },
}

impl PlatformEvent {
    pub fn guild_id(&self) -> &GuildId {
        match self {
            PlatformEvent::GuildCreate { guild_id, .. }
            | PlatformEvent::GuildDelete { guild_id }
            | PlatformEvent::MemberAdd { guild_id, .. }
            | PlatformEvent::MemberRemove { guild_id, .. }
            | PlatformEvent::MemberUpdate { guild_id, .. }
            | PlatformEvent::MembersChunk { guild_id, .. }
            | PlatformEvent::PresenceUpdate { guild_id, .. }
            | PlatformEvent::RoleUpsert { guild_id, .. }
            | PlatformEvent::RoleDelete { guild_id, .. } => guild_id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            PlatformEvent::GuildCreate { .. } => "guild_create",
            PlatformEvent::GuildDelete { .. } => "guild_delete",
            PlatformEvent::MemberAdd { .. } => "member_add",
            PlatformEvent::MemberRemove { .. } => "member_remove",
            PlatformEvent::MemberUpdate { .. } => "member_update",
            PlatformEvent::MembersChunk { .. } => "members_chunk",
            PlatformEvent::PresenceUpdate { .. } => "presence_update",
            PlatformEvent::RoleUpsert { .. } => "role_upsert",
            PlatformEvent::RoleDelete { .. } => "role_delete",
        }
    }
}
