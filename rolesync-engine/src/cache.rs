//! Cache Store: per-guild Membership Set and Presence Set.
//!
//! Each set sits behind its own mutex. When an operation needs both, the
//! membership lock is taken first, and neither is ever held across an await:
//! every accessor here is synchronous and closure-scoped.
//!
//! The maps are only changed by whole-entry insert, remove or replace, so a
//! poisoned lock still guards a consistent map and is recovered.

use rolesync_core::{GuildId, Member, MemberId, Presence, RoleId};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

pub type MembershipSet = HashMap<MemberId, Member>;
pub type PresenceSet = HashMap<MemberId, Presence>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
pub struct CacheStore {
    membership: Mutex<HashMap<GuildId, MembershipSet>>,
    presence: Mutex<HashMap<GuildId, PresenceSet>>,
}

impl CacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    // === Membership ===

    /// Reset a guild's Membership Set to empty ("not yet populated").
    pub fn reset_membership(&self, guild: &GuildId) {
        lock(&self.membership).insert(guild.clone(), MembershipSet::new());
    }

    /// Replace a guild's Membership Set with a complete enumeration.
    pub fn publish_membership(&self, guild: &GuildId, members: MembershipSet) {
        lock(&self.membership).insert(guild.clone(), members);
    }

    /// Insert or replace one member, returning the previous entry.
    pub fn upsert_member(&self, guild: &GuildId, member: Member) -> Option<Member> {
        lock(&self.membership)
            .entry(guild.clone())
            .or_default()
            .insert(member.id.clone(), member)
    }

    pub fn remove_member(&self, guild: &GuildId, member: &MemberId) -> Option<Member> {
        lock(&self.membership)
            .get_mut(guild)
            .and_then(|set| set.remove(member))
    }

    pub fn member(&self, guild: &GuildId, member: &MemberId) -> Option<Member> {
        lock(&self.membership)
            .get(guild)
            .and_then(|set| set.get(member).cloned())
    }

    pub fn member_count(&self, guild: &GuildId) -> usize {
        lock(&self.membership).get(guild).map_or(0, HashMap::len)
    }

    /// Members of the published set holding `role`.
    pub fn members_with_role(&self, guild: &GuildId, role: &RoleId) -> Vec<Member> {
        self.with_membership(guild, |set| {
            set.map(|set| set.values().filter(|m| m.has_role(role)).cloned().collect())
                .unwrap_or_default()
        })
    }

    /// Run `f` against the guild's Membership Set under the membership lock.
    pub fn with_membership<R>(
        &self,
        guild: &GuildId,
        f: impl FnOnce(Option<&MembershipSet>) -> R,
    ) -> R {
        let guard = lock(&self.membership);
        f(guard.get(guild))
    }

    // === Presence ===

    /// Replace a guild's Presence Set wholesale.
    pub fn replace_presences(&self, guild: &GuildId, presences: PresenceSet) {
        lock(&self.presence).insert(guild.clone(), presences);
    }

    pub fn presence_count(&self, guild: &GuildId) -> usize {
        lock(&self.presence).get(guild).map_or(0, HashMap::len)
    }

    /// Run `f` against the guild's Presence Set under the presence lock.
    pub fn with_presence<R>(
        &self,
        guild: &GuildId,
        f: impl FnOnce(Option<&PresenceSet>) -> R,
    ) -> R {
        let guard = lock(&self.presence);
        f(guard.get(guild))
    }

    // === Both ===

    /// Forget everything about a guild. Takes the locks one after the other.
    pub fn drop_guild(&self, guild: &GuildId) {
        lock(&self.membership).remove(guild);
        lock(&self.presence).remove(guild);
    }

    pub fn guilds(&self) -> Vec<GuildId> {
        lock(&self.membership).keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rolesync_core::PresenceStatus;
    use std::sync::Arc;
    use std::thread;

    fn member(id: &str, roles: &[&str]) -> Member {
        Member::new(id, roles.iter().map(|r| RoleId::from(*r)).collect())
    }

    #[test]
    fn test_publish_replaces_rather_than_merges() {
        let cache = CacheStore::new();
        let guild = GuildId::from("g");
        cache.upsert_member(&guild, member("old", &[]));

        let mut fresh = MembershipSet::new();
        fresh.insert("a".into(), member("a", &["R1"]));
        cache.publish_membership(&guild, fresh);

        assert_eq!(cache.member_count(&guild), 1);
        assert!(cache.member(&guild, &"old".into()).is_none());
    }

    #[test]
    fn test_upsert_returns_previous() {
        let cache = CacheStore::new();
        let guild = GuildId::from("g");
        assert!(cache.upsert_member(&guild, member("a", &["R1"])).is_none());
        let previous = cache.upsert_member(&guild, member("a", &["R2"]));
        assert_eq!(previous.map(|m| m.roles), Some(vec![RoleId::from("R1")]));
    }

    #[test]
    fn test_remove_from_unknown_guild_is_noop() {
        let cache = CacheStore::new();
        assert!(cache.remove_member(&"nope".into(), &"a".into()).is_none());
    }

    #[test]
    fn test_members_with_role() {
        let cache = CacheStore::new();
        let guild = GuildId::from("g");
        cache.upsert_member(&guild, member("a", &["R1"]));
        cache.upsert_member(&guild, member("b", &["R1", "R2"]));
        cache.upsert_member(&guild, member("c", &[]));
        assert_eq!(cache.members_with_role(&guild, &"R1".into()).len(), 2);
        assert_eq!(cache.members_with_role(&guild, &"R2".into()).len(), 1);
    }

    #[test]
    fn test_presence_replace_and_drop_guild() {
        let cache = CacheStore::new();
        let guild = GuildId::from("g");
        let mut presences = PresenceSet::new();
        presences.insert("a".into(), Presence::new("a", PresenceStatus::Online));
        cache.replace_presences(&guild, presences);
        cache.upsert_member(&guild, member("a", &[]));
        assert_eq!(cache.presence_count(&guild), 1);

        cache.drop_guild(&guild);
        assert_eq!(cache.presence_count(&guild), 0);
        assert_eq!(cache.member_count(&guild), 0);
    }

    #[test]
    fn test_concurrent_mutation_never_tears_reads() {
        let cache = Arc::new(CacheStore::new());
        let guild = GuildId::from("g");
        cache.reset_membership(&guild);

        let writers: Vec<_> = (0..4)
            .map(|w| {
                let cache = Arc::clone(&cache);
                let guild = guild.clone();
                thread::spawn(move || {
                    for i in 0..500 {
                        let id = format!("{}-{}", w, i);
                        cache.upsert_member(&guild, member(&id, &["R1"]));
                        cache.remove_member(&guild, &MemberId::from(id.as_str()));
                    }
                })
            })
            .collect();

        for _ in 0..500 {
            cache.with_membership(&guild, |set| {
                let set = set.expect("guild present");
                let holding = set.values().filter(|m| m.has_role(&"R1".into())).count();
                assert_eq!(holding, set.len());
            });
        }

        for writer in writers {
            writer.join().expect("writer thread");
        }
        assert_eq!(cache.member_count(&guild), 0);
    }
}
