//! `/api/admin`: privilege gate and the admin operations behind it.

mod support;

use axum::http::StatusCode;
use rolesync_test_utils::fixtures;
use rolesync_test_utils::{HeroStats, LookupKind, MemberId};
use serde_json::json;
use support::TestApp;

fn admin_uri(path: &str) -> String {
    format!("/api/admin/{}/{}", fixtures::GUILD, path)
}

#[tokio::test]
async fn test_unprivileged_caller_is_forbidden() {
    let app = TestApp::seeded();
    let (status, body) = app
        .post_json(
            &admin_uri("sync-role"),
            json!({ "caller": "1", "slug": "tester" }),
        )
        .await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "FORBIDDEN");
    assert!(app.datastore.grants().is_empty());
}

#[tokio::test]
async fn test_unknown_guild_is_404() {
    let app = TestApp::seeded();
    let (status, body) = app
        .get("/api/admin/999/members/R1?caller=lead")
        .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "GUILD_NOT_FOUND");
}

#[tokio::test]
async fn test_sync_role_grants_linked_holders() {
    let app = TestApp::seeded();
    let (status, body) = app
        .post_json(
            &admin_uri("sync-role"),
            json!({ "caller": "lead", "slug": "tester" }),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "slug": "tester", "granted": 1 }));
    assert_eq!(app.datastore.grants(), vec![(MemberId::from("1"), 3)]);
}

#[tokio::test]
async fn test_sync_role_unmapped_slug() {
    let app = TestApp::seeded();
    let (status, body) = app
        .post_json(
            &admin_uri("sync-role"),
            json!({ "caller": "lead", "slug": "moderator" }),
        )
        .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "ROLE_NOT_MAPPED");
}

#[tokio::test]
async fn test_remove_player_by_mention() {
    let app = TestApp::new(fixtures::datastore().with_account("1", &["tester"]));
    app.state
        .ctx
        .cache
        .upsert_member(&fixtures::guild(), fixtures::member("lead", &["R9"]));

    let (status, body) = app
        .post_json(
            &admin_uri("remove-player"),
            json!({ "caller": "lead", "query": "<@1>" }),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "removed": "1" }));
    assert_eq!(app.datastore.revokes(), vec![(MemberId::from("1"), 3)]);
    assert_eq!(app.platform.revokes().len(), 1);
}

#[tokio::test]
async fn test_remove_player_bad_query_is_400() {
    let app = TestApp::seeded();
    let (status, body) = app
        .post_json(
            &admin_uri("remove-player"),
            json!({ "caller": "lead", "query": "RoyalMaka" }),
        )
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_INPUT");
    assert!(app.datastore.revokes().is_empty());
}

#[tokio::test]
async fn test_check_account_by_hero() {
    let app = TestApp::new(
        fixtures::datastore()
            .with_account("7", &["tester", "staff"])
            .with_lookup(LookupKind::Hero, "RoyalMaka", "7"),
    );
    app.state
        .ctx
        .cache
        .upsert_member(&fixtures::guild(), fixtures::member("lead", &["R9"]));

    let (status, body) = app
        .get(&admin_uri("check?caller=lead&query=hero:RoyalMaka"))
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["discord_id"], "7");
    assert_eq!(body["roles"], json!(["tester", "staff"]));
}

#[tokio::test]
async fn test_check_unlinked_account_is_404() {
    let app = TestApp::seeded();
    let (status, body) = app
        .get(&admin_uri("check?caller=lead&query=website:nobody"))
        .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "ACCOUNT_NOT_FOUND");
}

#[tokio::test]
async fn test_members_with_role_sorted() {
    let app = TestApp::seeded();
    let (status, body) = app.get(&admin_uri("members/R1?caller=lead")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 2);
    let ids: Vec<&str> = body["members"]
        .as_array()
        .expect("members array")
        .iter()
        .filter_map(|m| m["id"].as_str())
        .collect();
    assert_eq!(ids, vec!["1", "2"]);
}

#[tokio::test]
async fn test_missing_caller_is_client_error() {
    let app = TestApp::seeded();
    let (status, _) = app.get(&admin_uri("members/R1")).await;
    assert!(status.is_client_error());
}

fn stats_app() -> TestApp {
    TestApp::new(
        fixtures::datastore()
            .with_account("1", &[])
            .with_account("7", &["tester"])
            .with_lookup(LookupKind::Hero, "RoyalMaka", "7")
            .with_hero_stats(
                "7",
                HeroStats::from_rows("RoyalMaka", [("level", "14.0"), ("c_kit", "2")]),
            ),
    )
}

#[tokio::test]
async fn test_stats_for_other_account_needs_no_privilege() {
    let app = stats_app();
    let (status, body) = app
        .get(&admin_uri("stats?caller=1&query=hero:RoyalMaka"))
        .await;

    assert_eq!(status, StatusCode::OK);
    let heroes = body["heroes"].as_array().expect("heroes array");
    assert_eq!(heroes.len(), 1);
    assert_eq!(heroes[0]["hero_name"], "RoyalMaka");
    assert_eq!(heroes[0]["level"], 14);
    assert_eq!(heroes[0]["class"], "Gunner");
    assert_eq!(heroes[0]["team"], serde_json::Value::Null);
}

#[tokio::test]
async fn test_stats_default_to_caller() {
    let app = stats_app();
    let (status, body) = app.get(&admin_uri("stats?caller=7")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["heroes"][0]["hero_name"], "RoyalMaka");

    let (status, body) = app.get(&admin_uri("stats?caller=1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "heroes": [] }));
}

#[tokio::test]
async fn test_stats_unlinked_is_404() {
    let app = stats_app();
    let (status, body) = app.get(&admin_uri("stats?caller=404")).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "ACCOUNT_NOT_FOUND");
}

#[tokio::test]
async fn test_stats_bad_query_is_400() {
    let app = stats_app();
    let (status, body) = app.get(&admin_uri("stats?caller=1&query=RoyalMaka")).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_INPUT");
}
