//! Collaborator traits: the datastore, the chat platform and the metrics sink.
//!
//! The engine only ever talks to these through `Arc<dyn ...>`, so tests can
//! swap in the mocks from `rolesync-test-utils`.

use crate::entities::{
    AccountSummary, DatastoreRole, GuildSnapshot, HeroStats, LinkedAccount, RoleInfo,
};
use crate::error::{DatastoreResult, MetricsError, PlatformResult};
use crate::identity::{ChannelId, GuildId, MemberId, RoleId, RoleSlug};
use crate::lookup::LookupKind;
use crate::metrics::MetricSample;
use async_trait::async_trait;

// ============================================================================
// DATASTORE
// ============================================================================

/// External relational store of linked accounts and their role slugs.
#[async_trait]
pub trait Datastore: Send + Sync {
    /// Cheap connectivity check.
    async fn ping(&self) -> DatastoreResult<()>;

    /// Every account that has a platform identity, with its slug list.
    async fn linked_accounts(&self) -> DatastoreResult<Vec<LinkedAccount>>;

    /// Slugs held by the account linked to `identity`.
    ///
    /// Returns `NotFound` when no account is linked. A linked account with no
    /// roles yields an empty list.
    async fn roles_for_identity(&self, identity: &MemberId) -> DatastoreResult<Vec<RoleSlug>>;

    async fn role_by_slug(&self, slug: &RoleSlug) -> DatastoreResult<DatastoreRole>;

    /// Grant a datastore role to the account linked to `identity`.
    /// Granting a role the account already holds is not an error.
    async fn grant_role(&self, identity: &MemberId, role_id: i64) -> DatastoreResult<()>;

    /// Grant a role to many identities; returns how many were newly granted
    /// or already held it.
    async fn grant_role_many(&self, identities: &[MemberId], role_id: i64) -> DatastoreResult<u64> {
        let mut done = 0u64;
        for identity in identities {
            match self.grant_role(identity, role_id).await {
                Ok(()) => done += 1,
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }
        Ok(done)
    }

    async fn revoke_role(&self, identity: &MemberId, role_id: i64) -> DatastoreResult<()>;

    /// Resolve an account key of the given kind to its platform identity.
    async fn lookup_identity(&self, kind: LookupKind, key: &str) -> DatastoreResult<MemberId>;

    async fn account_summary(&self, identity: &MemberId) -> DatastoreResult<AccountSummary>;

    /// Stats of every hero owned by the account linked to `identity`.
    /// `NotFound` when no account is linked; an account without heroes
    /// yields an empty list.
    async fn hero_stats(&self, identity: &MemberId) -> DatastoreResult<Vec<HeroStats>>;
}

// ============================================================================
// PLATFORM
// ============================================================================

/// Chat platform operations used by the engine.
#[async_trait]
pub trait PlatformClient: Send + Sync {
    /// Ask the platform to start a chunked member enumeration of `guild`.
    /// Chunks arrive later through the ingest path.
    async fn request_full_membership(&self, guild: &GuildId) -> PlatformResult<()>;

    async fn grant_role(&self, guild: &GuildId, member: &MemberId, role: &RoleId)
        -> PlatformResult<()>;

    async fn revoke_role(
        &self,
        guild: &GuildId,
        member: &MemberId,
        role: &RoleId,
    ) -> PlatformResult<()>;

    async fn send_direct_message(&self, member: &MemberId, text: &str) -> PlatformResult<()>;

    async fn send_channel_message(&self, channel: &ChannelId, text: &str) -> PlatformResult<()>;

    /// Current view of the guild from the live platform state.
    async fn guild_snapshot(&self, guild: &GuildId) -> PlatformResult<GuildSnapshot>;

    /// Look up one role. `Ok(None)` when the guild has no such role.
    async fn guild_role(&self, guild: &GuildId, role: &RoleId) -> PlatformResult<Option<RoleInfo>> {
        let snapshot = self.guild_snapshot(guild).await?;
        Ok(snapshot.role(role).cloned())
    }
}

// ============================================================================
// METRICS
// ============================================================================

/// Destination for metric samples. Callers log failures and carry on.
pub trait MetricsSink: Send + Sync {
    fn record(&self, sample: &MetricSample) -> Result<(), MetricsError>;

    /// Close one sampling pass over `guild`. Samples of `series` tagged with
    /// the guild that were not recorded again since the previous pass are
    /// dropped.
    fn end_pass(&self, _series: &str, _guild: &GuildId) {}

    /// Drop every sample of `series` tagged with `guild`.
    fn retire(&self, _series: &str, _guild: &GuildId) {}
}
