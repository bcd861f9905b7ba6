//! Admin operations behind the privileged-role predicate, plus the hero
//! stats lookup that any member may run.
//!
//! Callers check [`AdminService::authorize`] first; the operations themselves
//! do not re-check.

use crate::context::EngineContext;
use rolesync_core::{
    AccountSummary, DatastoreResult, EngineError, GuildId, HeroStats, IdentityQuery, Member,
    MemberId, RoleId, RoleSlug, RoleSyncResult,
};

#[derive(Debug, Clone)]
pub struct AdminService {
    ctx: EngineContext,
}

impl AdminService {
    pub fn new(ctx: EngineContext) -> Self {
        Self { ctx }
    }

    /// Whether the caller's cached roles include one of the guild's
    /// privileged roles. Callers absent from the Membership Set are not.
    pub fn is_privileged(&self, guild: &GuildId, caller: &MemberId) -> bool {
        self.ctx
            .cache
            .member(guild, caller)
            .is_some_and(|m| self.ctx.role_map.is_privileged(guild, &m.roles))
    }

    /// Refuse guilds without a role mapping.
    pub fn require_guild(&self, guild: &GuildId) -> Result<(), EngineError> {
        if self.ctx.role_map.guild(guild).is_none() {
            return Err(EngineError::UnknownGuild {
                guild_id: guild.to_string(),
            });
        }
        Ok(())
    }

    pub fn authorize(&self, guild: &GuildId, caller: &MemberId) -> Result<(), EngineError> {
        self.require_guild(guild)?;
        if !self.is_privileged(guild, caller) {
            tracing::warn!(guild_id = %guild, member_id = %caller, "Admin request refused");
            return Err(EngineError::NotPrivileged {
                guild_id: guild.to_string(),
                member_id: caller.to_string(),
            });
        }
        Ok(())
    }

    pub fn members_with_role(&self, guild: &GuildId, role: &RoleId) -> Vec<Member> {
        self.ctx.cache.members_with_role(guild, role)
    }

    /// Grant the datastore role named by `slug` to every cached member who
    /// holds the matching platform role. Returns how many accounts hold it
    /// afterwards; members without a linked account are skipped.
    pub async fn sync_role_to_datastore(
        &self,
        guild: &GuildId,
        slug: &RoleSlug,
    ) -> RoleSyncResult<u64> {
        let role = self.resolve(guild, slug)?.clone();
        let ds_role = self.ctx.datastore.role_by_slug(slug).await?;

        let identities: Vec<MemberId> = self
            .members_with_role(guild, &role)
            .into_iter()
            .map(|m| m.id)
            .collect();
        let granted = self
            .ctx
            .datastore
            .grant_role_many(&identities, ds_role.id)
            .await?;

        tracing::info!(
            guild_id = %guild,
            slug = %slug,
            holders = identities.len(),
            "Assigned {} to {} members",
            ds_role.title,
            granted
        );
        Ok(granted)
    }

    /// Take the player role away from an account, in the datastore and on the
    /// platform. Returns the resolved identity.
    pub async fn remove_player(
        &self,
        guild: &GuildId,
        query: &IdentityQuery,
    ) -> RoleSyncResult<MemberId> {
        let (slug, role) = match self.ctx.role_map.player_role(guild) {
            Some((slug, role)) => (slug.clone(), role.clone()),
            None => {
                return Err(EngineError::UnmappedRole {
                    guild_id: guild.to_string(),
                    slug: "player".to_string(),
                }
                .into())
            }
        };

        let identity = self.resolve_identity(query).await?;
        let ds_role = self.ctx.datastore.role_by_slug(&slug).await?;
        self.ctx.datastore.revoke_role(&identity, ds_role.id).await?;

        let platform = &self.ctx.platform;
        self.ctx
            .config
            .retry
            .run("revoke_role", || platform.revoke_role(guild, &identity, &role))
            .await?;

        tracing::info!(guild_id = %guild, member_id = %identity, slug = %slug, "Player removed");
        Ok(identity)
    }

    /// Resolve a query to a platform identity. Mentions carry it directly.
    pub async fn resolve_identity(&self, query: &IdentityQuery) -> DatastoreResult<MemberId> {
        match query {
            IdentityQuery::Mention(id) => Ok(id.clone()),
            IdentityQuery::By { kind, key } => self.ctx.datastore.lookup_identity(*kind, key).await,
        }
    }

    pub async fn lookup_account(&self, query: &IdentityQuery) -> DatastoreResult<AccountSummary> {
        let identity = self.resolve_identity(query).await?;
        self.ctx.datastore.account_summary(&identity).await
    }

    /// Stats of every hero owned by the account behind `query`.
    pub async fn hero_stats(&self, query: &IdentityQuery) -> DatastoreResult<Vec<HeroStats>> {
        let identity = self.resolve_identity(query).await?;
        let heroes = self.ctx.datastore.hero_stats(&identity).await?;
        tracing::debug!(member_id = %identity, heroes = heroes.len(), "Hero stats loaded");
        Ok(heroes)
    }

    fn resolve(&self, guild: &GuildId, slug: &RoleSlug) -> Result<&RoleId, EngineError> {
        self.ctx
            .role_map
            .resolve(guild, slug)
            .ok_or_else(|| EngineError::UnmappedRole {
                guild_id: guild.to_string(),
                slug: slug.to_string(),
            })
    }
}
