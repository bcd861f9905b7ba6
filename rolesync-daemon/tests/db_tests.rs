//! PostgreSQL datastore against a live database.
//!
//! Run with `--features db-tests` and `ROLESYNC_TEST_DB_*` pointing at a
//! scratch database. The schema in `sql/schema.sql` is applied and seeded.

#![cfg(feature = "db-tests")]

use rolesync_core::{Datastore, LookupKind, MemberId, RoleSlug};
use rolesync_daemon::{DbConfig, PgDatastore};

const SCHEMA: &str = include_str!("../sql/schema.sql");

// Every test truncates and reseeds the same database.
static DB_LOCK: tokio::sync::Mutex<()> = tokio::sync::Mutex::const_new(());

fn test_config() -> DbConfig {
    let env = |key: &str, default: &str| std::env::var(key).unwrap_or_else(|_| default.to_string());
    DbConfig {
        host: env("ROLESYNC_TEST_DB_HOST", "localhost"),
        port: env("ROLESYNC_TEST_DB_PORT", "5432").parse().unwrap_or(5432),
        dbname: env("ROLESYNC_TEST_DB_NAME", "rolesync_test"),
        user: env("ROLESYNC_TEST_DB_USER", "postgres"),
        password: env("ROLESYNC_TEST_DB_PASSWORD", ""),
        ..DbConfig::default()
    }
}

async fn seeded_store() -> (tokio::sync::MutexGuard<'static, ()>, PgDatastore) {
    let guard = DB_LOCK.lock().await;
    let config = test_config();
    let pool = config.create_pool().expect("pool");
    let conn = pool.get().await.expect("connection");
    conn.batch_execute(SCHEMA).await.expect("schema");
    conn.batch_execute(
        "TRUNCATE role_user, game_stats, game_heroes, user_discords, roles, users RESTART IDENTITY CASCADE;
         INSERT INTO users (username) VALUES ('Makahost'), ('Unlinked');
         INSERT INTO user_discords (user_id, discord_id, discord_name) VALUES (1, '100', 'maka#1');
         INSERT INTO roles (title, slug) VALUES ('Tester', 'tester'), ('Staff', 'staff');
         INSERT INTO role_user (user_id, role_id) VALUES (1, 2);
         INSERT INTO game_heroes (user_id, hero_name) VALUES (1, 'RoyalMaka');
         INSERT INTO game_stats (hero_id, stats_key, stats_value)
             VALUES (1, 'level', '14.0000'), (1, 'c_kit', '2'), (1, 'win', '3');",
    )
    .await
    .expect("seed");
    drop(conn);

    let store = PgDatastore::new(pool);
    store.verify_statements().await.expect("statements prepare");
    (guard, store)
}

#[tokio::test]
async fn test_roles_grant_and_revoke() {
    let (_guard, store) = seeded_store().await;
    let identity = MemberId::from("100");

    assert_eq!(
        store.roles_for_identity(&identity).await.expect("roles"),
        vec![RoleSlug::from("staff")]
    );
    assert!(store
        .roles_for_identity(&MemberId::from("404"))
        .await
        .expect_err("unlinked")
        .is_not_found());

    let tester = store
        .role_by_slug(&RoleSlug::from("tester"))
        .await
        .expect("role");
    store.grant_role(&identity, tester.id).await.expect("grant");
    store.grant_role(&identity, tester.id).await.expect("grant twice");
    let mut slugs = store.roles_for_identity(&identity).await.expect("roles");
    slugs.sort();
    assert_eq!(slugs, vec![RoleSlug::from("staff"), RoleSlug::from("tester")]);

    store.revoke_role(&identity, tester.id).await.expect("revoke");
    assert_eq!(
        store.roles_for_identity(&identity).await.expect("roles"),
        vec![RoleSlug::from("staff")]
    );
}

#[tokio::test]
async fn test_grant_many_counts_linked_only() {
    let (_guard, store) = seeded_store().await;
    let granted = store
        .grant_role_many(&[MemberId::from("100"), MemberId::from("404")], 1)
        .await
        .expect("grant many");
    assert_eq!(granted, 1);
}

#[tokio::test]
async fn test_lookups_and_summary() {
    let (_guard, store) = seeded_store().await;

    assert_eq!(
        store
            .lookup_identity(LookupKind::Hero, "royalmaka")
            .await
            .expect("hero"),
        MemberId::from("100")
    );
    assert_eq!(
        store
            .lookup_identity(LookupKind::Website, "MAKAHOST")
            .await
            .expect("website"),
        MemberId::from("100")
    );
    assert!(store
        .lookup_identity(LookupKind::Website, "Unlinked")
        .await
        .is_err());

    let summary = store
        .account_summary(&MemberId::from("100"))
        .await
        .expect("summary");
    assert_eq!(summary.username, "Makahost");
    assert_eq!(summary.discord_name.as_deref(), Some("maka#1"));
    assert_eq!(summary.roles, vec![RoleSlug::from("staff")]);

    let linked = store.linked_accounts().await.expect("linked");
    assert_eq!(linked.len(), 1);
    assert_eq!(linked[0].slug_list.as_deref(), Some("staff"));
}

#[tokio::test]
async fn test_hero_stats() {
    let (_guard, store) = seeded_store().await;

    let heroes = store
        .hero_stats(&MemberId::from("100"))
        .await
        .expect("stats");
    assert_eq!(heroes.len(), 1);
    assert_eq!(heroes[0].hero_name, "RoyalMaka");
    assert_eq!(heroes[0].level, 14);
    assert_eq!(heroes[0].wins, 3);
    assert_eq!(heroes[0].class.as_deref(), Some("Gunner"));
    assert_eq!(heroes[0].team, None);

    assert!(store
        .hero_stats(&MemberId::from("404"))
        .await
        .expect_err("unlinked")
        .is_not_found());
}
