//! rolesync Test Utilities
//!
//! Shared test infrastructure for the rolesync workspace:
//! - In-memory mock datastore, platform client and metrics sink
//! - Proptest generators for members and presences
//! - Fixtures for a small configured guild

pub use rolesync_core::{
    AccountSummary, ChannelId, Datastore, DatastoreError, DatastoreResult, DatastoreRole,
    GuildId, GuildRoles, GuildSnapshot, HeroStats, LinkedAccount, LookupKind, Member, MemberId,
    MetricSample, MetricsError, MetricsSink, PlatformClient, PlatformError, PlatformResult,
    Presence, PresenceStatus, RoleId, RoleInfo, RoleMap, RoleSlug,
};

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// MOCK DATASTORE
// ============================================================================

/// In-memory datastore keyed by platform identity.
#[derive(Debug, Default)]
pub struct MockDatastore {
    accounts: Mutex<BTreeMap<MemberId, Vec<RoleSlug>>>,
    roles: Mutex<HashMap<RoleSlug, DatastoreRole>>,
    lookups: Mutex<HashMap<(LookupKind, String), MemberId>>,
    heroes: Mutex<HashMap<MemberId, Vec<HeroStats>>>,
    grants: Mutex<Vec<(MemberId, i64)>>,
    revokes: Mutex<Vec<(MemberId, i64)>>,
    unavailable: AtomicBool,
}

impl MockDatastore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Link `identity` to an account holding `slugs`.
    pub fn with_account(self, identity: impl Into<MemberId>, slugs: &[&str]) -> Self {
        lock(&self.accounts).insert(
            identity.into(),
            slugs.iter().map(|s| RoleSlug::from(*s)).collect(),
        );
        self
    }

    pub fn with_role(self, id: i64, slug: &str, title: &str) -> Self {
        lock(&self.roles).insert(
            RoleSlug::from(slug),
            DatastoreRole {
                id,
                title: title.to_string(),
                slug: RoleSlug::from(slug),
            },
        );
        self
    }

    pub fn with_lookup(self, kind: LookupKind, key: &str, identity: impl Into<MemberId>) -> Self {
        lock(&self.lookups).insert((kind, key.to_string()), identity.into());
        self
    }

    /// Give the account linked to `identity` a hero.
    pub fn with_hero_stats(self, identity: impl Into<MemberId>, stats: HeroStats) -> Self {
        lock(&self.heroes)
            .entry(identity.into())
            .or_default()
            .push(stats);
        self
    }

    /// Make every call fail with a transport error.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn slugs_of(&self, identity: &MemberId) -> Option<Vec<RoleSlug>> {
        lock(&self.accounts).get(identity).cloned()
    }

    pub fn grants(&self) -> Vec<(MemberId, i64)> {
        lock(&self.grants).clone()
    }

    pub fn revokes(&self) -> Vec<(MemberId, i64)> {
        lock(&self.revokes).clone()
    }

    fn check_available(&self) -> DatastoreResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(DatastoreError::transport("connection refused"));
        }
        Ok(())
    }

    fn slug_for_role_id(&self, role_id: i64) -> DatastoreResult<RoleSlug> {
        lock(&self.roles)
            .values()
            .find(|r| r.id == role_id)
            .map(|r| r.slug.clone())
            .ok_or_else(|| DatastoreError::not_found(format!("role {}", role_id)))
    }
}

#[async_trait]
impl Datastore for MockDatastore {
    async fn ping(&self) -> DatastoreResult<()> {
        self.check_available()
    }

    async fn linked_accounts(&self) -> DatastoreResult<Vec<LinkedAccount>> {
        self.check_available()?;
        Ok(lock(&self.accounts)
            .iter()
            .map(|(identity, slugs)| LinkedAccount {
                identity: identity.clone(),
                slug_list: if slugs.is_empty() {
                    None
                } else {
                    Some(
                        slugs
                            .iter()
                            .map(RoleSlug::as_str)
                            .collect::<Vec<_>>()
                            .join(","),
                    )
                },
            })
            .collect())
    }

    async fn roles_for_identity(&self, identity: &MemberId) -> DatastoreResult<Vec<RoleSlug>> {
        self.check_available()?;
        lock(&self.accounts)
            .get(identity)
            .cloned()
            .ok_or_else(|| DatastoreError::not_found(format!("linked account {}", identity)))
    }

    async fn role_by_slug(&self, slug: &RoleSlug) -> DatastoreResult<DatastoreRole> {
        self.check_available()?;
        lock(&self.roles)
            .get(slug)
            .cloned()
            .ok_or_else(|| DatastoreError::not_found(format!("role {}", slug)))
    }

    async fn grant_role(&self, identity: &MemberId, role_id: i64) -> DatastoreResult<()> {
        self.check_available()?;
        let slug = self.slug_for_role_id(role_id)?;
        {
            let mut accounts = lock(&self.accounts);
            let slugs = accounts
                .get_mut(identity)
                .ok_or_else(|| DatastoreError::not_found(format!("linked account {}", identity)))?;
            if !slugs.contains(&slug) {
                slugs.push(slug);
            }
        }
        lock(&self.grants).push((identity.clone(), role_id));
        Ok(())
    }

    async fn revoke_role(&self, identity: &MemberId, role_id: i64) -> DatastoreResult<()> {
        self.check_available()?;
        let slug = self.slug_for_role_id(role_id)?;
        {
            let mut accounts = lock(&self.accounts);
            let slugs = accounts
                .get_mut(identity)
                .ok_or_else(|| DatastoreError::not_found(format!("linked account {}", identity)))?;
            slugs.retain(|s| s != &slug);
        }
        lock(&self.revokes).push((identity.clone(), role_id));
        Ok(())
    }

    async fn lookup_identity(&self, kind: LookupKind, key: &str) -> DatastoreResult<MemberId> {
        self.check_available()?;
        if kind == LookupKind::Discord {
            let identity = MemberId::from(key);
            if lock(&self.accounts).contains_key(&identity) {
                return Ok(identity);
            }
        }
        lock(&self.lookups)
            .get(&(kind, key.to_string()))
            .cloned()
            .ok_or_else(|| DatastoreError::not_found(format!("{} account {}", kind, key)))
    }

    async fn account_summary(&self, identity: &MemberId) -> DatastoreResult<AccountSummary> {
        self.check_available()?;
        let slugs = self.roles_for_identity(identity).await?;
        Ok(AccountSummary {
            account_id: 1,
            username: format!("user-{}", identity),
            discord_id: Some(identity.clone()),
            discord_name: None,
            roles: slugs,
        })
    }

    async fn hero_stats(&self, identity: &MemberId) -> DatastoreResult<Vec<HeroStats>> {
        self.check_available()?;
        if !lock(&self.accounts).contains_key(identity) {
            return Err(DatastoreError::not_found(format!("linked account {}", identity)));
        }
        Ok(lock(&self.heroes).get(identity).cloned().unwrap_or_default())
    }
}

// ============================================================================
// MOCK PLATFORM
// ============================================================================

/// One outbound platform call, in the order it was issued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformCall {
    RequestMembership(GuildId),
    Grant {
        guild: GuildId,
        member: MemberId,
        role: RoleId,
    },
    Revoke {
        guild: GuildId,
        member: MemberId,
        role: RoleId,
    },
    DirectMessage {
        member: MemberId,
        text: String,
    },
    ChannelMessage {
        channel: ChannelId,
        text: String,
    },
}

/// Recording platform client with fault injection.
#[derive(Debug, Default)]
pub struct MockPlatform {
    calls: Mutex<Vec<PlatformCall>>,
    snapshots: Mutex<HashMap<GuildId, GuildSnapshot>>,
    grant_delay: Mutex<Option<Duration>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    transient_grant_failures: AtomicUsize,
    dm_closed: AtomicBool,
    snapshot_unavailable: AtomicBool,
    role_lookups: AtomicUsize,
}

impl MockPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_snapshot(self, guild: impl Into<GuildId>, snapshot: GuildSnapshot) -> Self {
        lock(&self.snapshots).insert(guild.into(), snapshot);
        self
    }

    /// Hold every grant for `delay` before answering.
    pub fn with_grant_delay(self, delay: Duration) -> Self {
        *lock(&self.grant_delay) = Some(delay);
        self
    }

    /// Fail the next `n` grants with a transient error.
    pub fn fail_next_grants(&self, n: usize) {
        self.transient_grant_failures.store(n, Ordering::SeqCst);
    }

    /// Reject direct messages, as for users with DMs disabled.
    pub fn close_direct_messages(&self) {
        self.dm_closed.store(true, Ordering::SeqCst);
    }

    pub fn set_snapshot_unavailable(&self, unavailable: bool) {
        self.snapshot_unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn set_snapshot(&self, guild: impl Into<GuildId>, snapshot: GuildSnapshot) {
        lock(&self.snapshots).insert(guild.into(), snapshot);
    }

    pub fn calls(&self) -> Vec<PlatformCall> {
        lock(&self.calls).clone()
    }

    pub fn grants(&self) -> Vec<(MemberId, RoleId)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                PlatformCall::Grant { member, role, .. } => Some((member, role)),
                _ => None,
            })
            .collect()
    }

    pub fn revokes(&self) -> Vec<(MemberId, RoleId)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                PlatformCall::Revoke { member, role, .. } => Some((member, role)),
                _ => None,
            })
            .collect()
    }

    pub fn direct_messages(&self) -> Vec<(MemberId, String)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                PlatformCall::DirectMessage { member, text } => Some((member, text)),
                _ => None,
            })
            .collect()
    }

    pub fn channel_messages(&self) -> Vec<(ChannelId, String)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                PlatformCall::ChannelMessage { channel, text } => Some((channel, text)),
                _ => None,
            })
            .collect()
    }

    pub fn membership_requests(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, PlatformCall::RequestMembership(_)))
            .count()
    }

    /// Highest number of grants observed running at the same time.
    pub fn max_concurrent_grants(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Number of `guild_role` lookups served.
    pub fn role_lookups(&self) -> usize {
        self.role_lookups.load(Ordering::SeqCst)
    }

    fn record(&self, call: PlatformCall) {
        lock(&self.calls).push(call);
    }
}

#[async_trait]
impl PlatformClient for MockPlatform {
    async fn request_full_membership(&self, guild: &GuildId) -> PlatformResult<()> {
        self.record(PlatformCall::RequestMembership(guild.clone()));
        Ok(())
    }

    async fn grant_role(
        &self,
        guild: &GuildId,
        member: &MemberId,
        role: &RoleId,
    ) -> PlatformResult<()> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let delay = *lock(&self.grant_delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let failing = self
            .transient_grant_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(PlatformError::Transport {
                reason: "connection reset".to_string(),
            });
        }

        self.record(PlatformCall::Grant {
            guild: guild.clone(),
            member: member.clone(),
            role: role.clone(),
        });
        Ok(())
    }

    async fn revoke_role(
        &self,
        guild: &GuildId,
        member: &MemberId,
        role: &RoleId,
    ) -> PlatformResult<()> {
        self.record(PlatformCall::Revoke {
            guild: guild.clone(),
            member: member.clone(),
            role: role.clone(),
        });
        Ok(())
    }

    async fn send_direct_message(&self, member: &MemberId, text: &str) -> PlatformResult<()> {
        if self.dm_closed.load(Ordering::SeqCst) {
            return Err(PlatformError::Request {
                endpoint: "users/@me/channels".to_string(),
                status: 403,
                message: "Cannot send messages to this user".to_string(),
            });
        }
        self.record(PlatformCall::DirectMessage {
            member: member.clone(),
            text: text.to_string(),
        });
        Ok(())
    }

    async fn send_channel_message(&self, channel: &ChannelId, text: &str) -> PlatformResult<()> {
        self.record(PlatformCall::ChannelMessage {
            channel: channel.clone(),
            text: text.to_string(),
        });
        Ok(())
    }

    async fn guild_snapshot(&self, guild: &GuildId) -> PlatformResult<GuildSnapshot> {
        if self.snapshot_unavailable.load(Ordering::SeqCst) {
            return Err(PlatformError::Transport {
                reason: "state unavailable".to_string(),
            });
        }
        lock(&self.snapshots)
            .get(guild)
            .cloned()
            .ok_or_else(|| PlatformError::NotFound {
                what: format!("guild {}", guild),
            })
    }

    async fn guild_role(&self, guild: &GuildId, role: &RoleId) -> PlatformResult<Option<RoleInfo>> {
        self.role_lookups.fetch_add(1, Ordering::SeqCst);
        let snapshot = self.guild_snapshot(guild).await?;
        Ok(snapshot.role(role).cloned())
    }
}

// ============================================================================
// RECORDING SINK
// ============================================================================

/// Metrics sink that keeps every sample it receives.
#[derive(Debug, Default)]
pub struct RecordingSink {
    samples: Mutex<Vec<MetricSample>>,
    /// `(series, guild)` of every closed pass, in order.
    passes: Mutex<Vec<(String, GuildId)>>,
    retired: Mutex<Vec<(String, GuildId)>>,
    failing: AtomicBool,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn samples(&self) -> Vec<MetricSample> {
        lock(&self.samples).clone()
    }

    /// Samples of `series` whose `metric` tag equals `metric`.
    pub fn find(&self, series: &str, metric: &str) -> Vec<MetricSample> {
        self.samples()
            .into_iter()
            .filter(|s| s.series == series && s.tag_value("metric") == Some(metric))
            .collect()
    }

    pub fn passes(&self) -> Vec<(String, GuildId)> {
        lock(&self.passes).clone()
    }

    pub fn retired(&self) -> Vec<(String, GuildId)> {
        lock(&self.retired).clone()
    }

    pub fn clear(&self) {
        lock(&self.samples).clear();
    }
}

impl MetricsSink for RecordingSink {
    fn record(&self, sample: &MetricSample) -> Result<(), MetricsError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(MetricsError::Unavailable {
                reason: "sink offline".to_string(),
            });
        }
        lock(&self.samples).push(sample.clone());
        Ok(())
    }

    fn end_pass(&self, series: &str, guild: &GuildId) {
        lock(&self.passes).push((series.to_string(), guild.clone()));
    }

    fn retire(&self, series: &str, guild: &GuildId) {
        lock(&self.retired).push((series.to_string(), guild.clone()));
    }
}

// ============================================================================
// GENERATORS
// ============================================================================

pub mod generators {
    use super::*;
    use proptest::collection::{hash_set, vec};
    use proptest::prelude::*;

    pub fn arb_member_id() -> impl Strategy<Value = MemberId> {
        "[1-9][0-9]{5,17}".prop_map(MemberId::from)
    }

    pub fn arb_role_id() -> impl Strategy<Value = RoleId> {
        prop_oneof![Just("R1"), Just("R2"), Just("R3"), Just("R4")].prop_map(RoleId::from)
    }

    pub fn arb_member() -> impl Strategy<Value = Member> {
        (arb_member_id(), vec(arb_role_id(), 0..4)).prop_map(|(id, roles)| Member::new(id, roles))
    }

    /// Members with pairwise-distinct ids.
    pub fn arb_unique_members(max: usize) -> impl Strategy<Value = Vec<Member>> {
        hash_set(arb_member_id(), 0..max).prop_flat_map(|ids| {
            let n = ids.len();
            (Just(ids), vec(vec(arb_role_id(), 0..4), n)).prop_map(|(ids, roles)| {
                ids.into_iter()
                    .zip(roles)
                    .map(|(id, roles)| Member::new(id, roles))
                    .collect()
            })
        })
    }

    pub fn arb_presence_status() -> impl Strategy<Value = PresenceStatus> {
        prop_oneof![
            Just(PresenceStatus::Online),
            Just(PresenceStatus::Idle),
            Just(PresenceStatus::Dnd),
            Just(PresenceStatus::Invisible),
            Just(PresenceStatus::Offline),
        ]
    }

    pub fn arb_presence(member_id: MemberId) -> impl Strategy<Value = Presence> {
        (
            arb_presence_status(),
            proptest::option::of(prop_oneof![Just("Heroes"), Just("Battlefield")]),
        )
            .prop_map(move |(status, game)| {
                let presence = Presence::new(member_id.clone(), status);
                match game {
                    Some(game) => presence.with_activity(game),
                    None => presence,
                }
            })
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

pub mod fixtures {
    use super::*;

    pub const GUILD: &str = "329078443687936001";

    pub fn guild() -> GuildId {
        GuildId::from(GUILD)
    }

    /// `tester` -> R1, `staff` -> R2, `awokenlead` -> R9 (privileged).
    pub fn role_map() -> RoleMap {
        RoleMap::default().with_guild(
            GUILD,
            GuildRoles::default()
                .with_role("tester", "R1")
                .with_role("staff", "R2")
                .with_role("awokenlead", "R9")
                .with_privileged("awokenlead")
                .with_player_slug("tester"),
        )
    }

    /// Datastore roles matching [`role_map`].
    pub fn datastore() -> MockDatastore {
        MockDatastore::new()
            .with_role(3, "tester", "Tester")
            .with_role(4, "staff", "Staff")
            .with_role(9, "awokenlead", "Awoken Lead")
    }

    pub fn member(id: &str, roles: &[&str]) -> Member {
        Member::new(id, roles.iter().map(|r| RoleId::from(*r)).collect())
            .with_username(format!("user{}", id))
    }

    pub fn role(id: &str, name: &str) -> RoleInfo {
        RoleInfo {
            id: RoleId::from(id),
            name: name.to_string(),
        }
    }

    /// Snapshot with named roles R1 "Testers" and R2 "Staff".
    pub fn snapshot(members: Vec<Member>, presences: Vec<Presence>) -> GuildSnapshot {
        GuildSnapshot {
            name: "Heroes Awaken".to_string(),
            members,
            presences,
            roles: vec![role("R1", "Testers"), role("R2", "Staff"), role("R9", "Lead")],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_datastore_not_linked() {
        let store = fixtures::datastore().with_account("1", &["tester"]);
        assert!(store.roles_for_identity(&"1".into()).await.is_ok());
        let err = store.roles_for_identity(&"2".into()).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_mock_datastore_grant_is_idempotent() {
        let store = fixtures::datastore().with_account("1", &["tester"]);
        store.grant_role(&"1".into(), 3).await.unwrap();
        assert_eq!(store.slugs_of(&"1".into()).unwrap().len(), 1);
        store.grant_role(&"1".into(), 4).await.unwrap();
        assert_eq!(store.slugs_of(&"1".into()).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_mock_platform_transient_failures() {
        let platform = MockPlatform::new();
        platform.fail_next_grants(1);
        let g = fixtures::guild();
        assert!(platform.grant_role(&g, &"1".into(), &"R1".into()).await.is_err());
        assert!(platform.grant_role(&g, &"1".into(), &"R1".into()).await.is_ok());
        assert_eq!(platform.grants().len(), 1);
    }

    #[test]
    fn test_recording_sink_find() {
        let sink = RecordingSink::new();
        sink.record(&MetricSample::new("s").tag("metric", "a")).unwrap();
        sink.record(&MetricSample::new("s").tag("metric", "b")).unwrap();
        assert_eq!(sink.find("s", "a").len(), 1);
        sink.set_failing(true);
        assert!(sink.record(&MetricSample::new("s")).is_err());
    }
}
