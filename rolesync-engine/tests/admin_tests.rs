//! Admin operations: privilege checks, role sync into the datastore, player
//! removal, account lookup and hero stats.

mod support;

use rolesync_core::{EngineError, HeroStats, IdentityQuery, LookupKind, RoleSyncError};
use rolesync_engine::AdminService;
use rolesync_test_utils::fixtures;
use rolesync_test_utils::{GuildId, MemberId, RoleId, RoleSlug};
use support::Harness;

fn seeded() -> (Harness, AdminService) {
    let h = Harness::standard(
        fixtures::datastore()
            .with_account("1", &[])
            .with_account("3", &["staff"])
            .with_account("7", &["tester", "staff"])
            .with_lookup(LookupKind::Hero, "Bob", "7"),
    );
    let guild = fixtures::guild();
    for member in [
        fixtures::member("1", &["R1"]),
        fixtures::member("2", &["R1"]),
        fixtures::member("3", &["R2"]),
        fixtures::member("lead", &["R2", "R9"]),
    ] {
        h.ctx.cache.upsert_member(&guild, member);
    }
    let admin = AdminService::new(h.ctx.clone());
    (h, admin)
}

#[test]
fn test_privileged_predicate() {
    let (_h, admin) = seeded();
    let guild = fixtures::guild();

    assert!(admin.is_privileged(&guild, &MemberId::from("lead")));
    assert!(!admin.is_privileged(&guild, &MemberId::from("1")));
    assert!(!admin.is_privileged(&guild, &MemberId::from("nobody")));

    assert!(admin.authorize(&guild, &MemberId::from("lead")).is_ok());
    assert!(matches!(
        admin.authorize(&guild, &MemberId::from("1")),
        Err(EngineError::NotPrivileged { .. })
    ));
    assert!(matches!(
        admin.authorize(&GuildId::from("elsewhere"), &MemberId::from("lead")),
        Err(EngineError::UnknownGuild { .. })
    ));
}

#[test]
fn test_members_with_role() {
    let (_h, admin) = seeded();
    let mut ids: Vec<MemberId> = admin
        .members_with_role(&fixtures::guild(), &RoleId::from("R1"))
        .into_iter()
        .map(|m| m.id)
        .collect();
    ids.sort();
    assert_eq!(ids, vec![MemberId::from("1"), MemberId::from("2")]);
}

#[tokio::test]
async fn test_sync_role_grants_linked_holders_only() {
    let (h, admin) = seeded();

    let granted = admin
        .sync_role_to_datastore(&fixtures::guild(), &RoleSlug::from("tester"))
        .await
        .expect("sync role");

    // Member 2 holds R1 but has no linked account.
    assert_eq!(granted, 1);
    assert_eq!(h.datastore.grants(), vec![(MemberId::from("1"), 3)]);
    assert_eq!(
        h.datastore.slugs_of(&MemberId::from("1")),
        Some(vec![RoleSlug::from("tester")])
    );
}

#[tokio::test]
async fn test_sync_role_with_unmapped_slug() {
    let (h, admin) = seeded();
    let result = admin
        .sync_role_to_datastore(&fixtures::guild(), &RoleSlug::from("moderator"))
        .await;

    assert!(matches!(
        result,
        Err(RoleSyncError::Engine(EngineError::UnmappedRole { .. }))
    ));
    assert!(h.datastore.grants().is_empty());
}

#[tokio::test]
async fn test_remove_player_by_hero_name() {
    let (h, admin) = seeded();
    let query: IdentityQuery = "hero:Bob".parse().expect("query");

    let identity = admin
        .remove_player(&fixtures::guild(), &query)
        .await
        .expect("remove player");

    assert_eq!(identity, MemberId::from("7"));
    assert_eq!(h.datastore.revokes(), vec![(MemberId::from("7"), 3)]);
    assert_eq!(
        h.datastore.slugs_of(&identity),
        Some(vec![RoleSlug::from("staff")])
    );
    assert_eq!(h.platform.revokes(), vec![(identity, RoleId::from("R1"))]);
}

#[tokio::test]
async fn test_remove_player_by_mention() {
    let (h, admin) = seeded();
    let query: IdentityQuery = "<@!7>".parse().expect("query");

    admin
        .remove_player(&fixtures::guild(), &query)
        .await
        .expect("remove player");
    assert_eq!(h.platform.revokes().len(), 1);
}

#[tokio::test]
async fn test_remove_player_unknown_account() {
    let (h, admin) = seeded();
    let query: IdentityQuery = "website:ghost".parse().expect("query");

    let result = admin.remove_player(&fixtures::guild(), &query).await;
    assert!(matches!(result, Err(RoleSyncError::Datastore(e)) if e.is_not_found()));
    assert!(h.platform.revokes().is_empty());
}

#[tokio::test]
async fn test_lookup_account() {
    let (_h, admin) = seeded();
    let summary = admin
        .lookup_account(&"discord:3".parse().expect("query"))
        .await
        .expect("summary");
    assert_eq!(summary.discord_id, Some(MemberId::from("3")));
    assert_eq!(summary.roles, vec![RoleSlug::from("staff")]);
}

fn stats_harness() -> (Harness, AdminService) {
    let h = Harness::standard(
        fixtures::datastore()
            .with_account("7", &["tester"])
            .with_account("8", &[])
            .with_lookup(LookupKind::Website, "Makahost", "7")
            .with_hero_stats(
                "7",
                HeroStats::from_rows("RoyalMaka", [("level", "14.0"), ("c_team", "2")]),
            )
            .with_hero_stats("7", HeroStats::from_rows("Alt", [("games", "3")])),
    );
    let admin = AdminService::new(h.ctx.clone());
    (h, admin)
}

#[tokio::test]
async fn test_hero_stats_by_website_name() {
    let (_h, admin) = stats_harness();
    let query: IdentityQuery = "website:Makahost".parse().expect("query");

    let heroes = admin.hero_stats(&query).await.expect("stats");

    let names: Vec<&str> = heroes.iter().map(|h| h.hero_name.as_str()).collect();
    assert_eq!(names, vec!["RoyalMaka", "Alt"]);
    assert_eq!(heroes[0].level, 14);
    assert_eq!(heroes[0].team.as_deref(), Some("Royal"));
    assert_eq!(heroes[1].games, 3);
}

#[tokio::test]
async fn test_hero_stats_account_without_heroes() {
    let (_h, admin) = stats_harness();
    let heroes = admin
        .hero_stats(&IdentityQuery::Mention(MemberId::from("8")))
        .await
        .expect("stats");
    assert!(heroes.is_empty());
}

#[tokio::test]
async fn test_hero_stats_unlinked_is_not_found() {
    let (_h, admin) = stats_harness();
    let err = admin
        .hero_stats(&IdentityQuery::Mention(MemberId::from("404")))
        .await
        .expect_err("unlinked");
    assert!(err.is_not_found());
}

#[test]
fn test_require_guild() {
    let (_h, admin) = stats_harness();
    assert!(admin.require_guild(&fixtures::guild()).is_ok());
    assert!(matches!(
        admin.require_guild(&GuildId::from("elsewhere")),
        Err(EngineError::UnknownGuild { .. })
    ));
}
