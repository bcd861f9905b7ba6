//! Static per-guild mapping from role slug to platform role id.
//!
//! Built once at startup from configuration and shared read-only afterwards.
//! There is no invalidation path; changing it requires a restart.

use crate::identity::{GuildId, RoleId, RoleSlug};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Role configuration of a single guild.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GuildRoles {
    /// slug -> platform role id
    #[serde(default)]
    pub roles: HashMap<RoleSlug, RoleId>,
    /// Slugs whose holders may run admin operations.
    #[serde(default)]
    pub privileged: Vec<RoleSlug>,
    /// Slug of the "player" role granted on tester promotion and revoked by
    /// `remove_player`.
    #[serde(default)]
    pub player_slug: Option<RoleSlug>,
}

impl GuildRoles {
    pub fn with_role(mut self, slug: impl Into<RoleSlug>, role: impl Into<RoleId>) -> Self {
        self.roles.insert(slug.into(), role.into());
        self
    }

    pub fn with_privileged(mut self, slug: impl Into<RoleSlug>) -> Self {
        self.privileged.push(slug.into());
        self
    }

    pub fn with_player_slug(mut self, slug: impl Into<RoleSlug>) -> Self {
        self.player_slug = Some(slug.into());
        self
    }
}

/// guild -> (slug -> role id), plus admin metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoleMap {
    guilds: HashMap<GuildId, GuildRoles>,
}

impl RoleMap {
    pub fn new(guilds: HashMap<GuildId, GuildRoles>) -> Self {
        Self { guilds }
    }

    /// Builder-style insert, only usable before the map is shared.
    pub fn with_guild(mut self, guild: impl Into<GuildId>, roles: GuildRoles) -> Self {
        self.guilds.insert(guild.into(), roles);
        self
    }

    pub fn guild(&self, guild: &GuildId) -> Option<&GuildRoles> {
        self.guilds.get(guild)
    }

    pub fn guild_ids(&self) -> impl Iterator<Item = &GuildId> {
        self.guilds.keys()
    }

    pub fn len(&self) -> usize {
        self.guilds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.guilds.is_empty()
    }

    /// Resolve a slug to the guild's platform role. `None` means "no mapping",
    /// which callers skip silently.
    pub fn resolve(&self, guild: &GuildId, slug: &RoleSlug) -> Option<&RoleId> {
        self.guilds.get(guild).and_then(|g| g.roles.get(slug))
    }

    /// Platform roles that grant admin rights in the guild.
    pub fn privileged_roles(&self, guild: &GuildId) -> Vec<&RoleId> {
        self.guilds
            .get(guild)
            .map(|g| g.privileged.iter().filter_map(|s| g.roles.get(s)).collect())
            .unwrap_or_default()
    }

    /// Whether any of `member_roles` is one of the guild's privileged roles.
    pub fn is_privileged(&self, guild: &GuildId, member_roles: &[RoleId]) -> bool {
        let privileged = self.privileged_roles(guild);
        member_roles.iter().any(|r| privileged.contains(&r))
    }

    /// The player slug and its platform role, when both are configured.
    pub fn player_role(&self, guild: &GuildId) -> Option<(&RoleSlug, &RoleId)> {
        let roles = self.guilds.get(guild)?;
        let slug = roles.player_slug.as_ref()?;
        roles.roles.get(slug).map(|role| (slug, role))
    }
}
