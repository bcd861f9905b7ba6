//! Router harness over the mock collaborators.

#![allow(dead_code)]

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use rolesync_daemon::{create_app_router, AppState, LiveState};
use rolesync_engine::{job_queue, EngineConfig, EngineContext, GuildRegistry, JobReceiver};
use rolesync_test_utils::fixtures;
use rolesync_test_utils::{MockDatastore, MockPlatform, RecordingSink};
use std::sync::Arc;
use tower::ServiceExt;

pub struct TestApp {
    pub router: Router,
    pub state: Arc<AppState>,
    pub datastore: Arc<MockDatastore>,
    pub platform: Arc<MockPlatform>,
    pub receiver: JobReceiver,
}

impl TestApp {
    pub fn new(datastore: MockDatastore) -> Self {
        let datastore = Arc::new(datastore);
        let platform = Arc::new(
            MockPlatform::new().with_snapshot(fixtures::GUILD, fixtures::snapshot(vec![], vec![])),
        );
        let config = EngineConfig::development();
        let (submitter, receiver) = job_queue(config.queue_capacity);
        let ctx = EngineContext::new(
            fixtures::role_map(),
            datastore.clone(),
            platform.clone(),
            Arc::new(RecordingSink::new()),
            submitter,
            config,
        );
        let state = Arc::new(AppState::new(
            ctx,
            Arc::new(GuildRegistry::new()),
            Arc::new(LiveState::new()),
        ));
        Self {
            router: create_app_router(state.clone()),
            state,
            datastore,
            platform,
            receiver,
        }
    }

    /// Fixture datastore with a privileged caller `lead` and two testers in
    /// the Membership Set.
    pub fn seeded() -> Self {
        let app = Self::new(fixtures::datastore().with_account("1", &[]));
        let guild = fixtures::guild();
        for member in [
            fixtures::member("1", &["R1"]),
            fixtures::member("2", &["R1"]),
            fixtures::member("lead", &["R2", "R9"]),
        ] {
            app.state.ctx.cache.upsert_member(&guild, member);
        }
        app
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, serde_json::Value) {
        self.send(Request::get(uri).body(Body::empty()).expect("request"))
            .await
    }

    pub async fn post_json(&self, uri: &str, body: serde_json::Value) -> (StatusCode, serde_json::Value) {
        self.send(
            Request::post(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .expect("request"),
        )
        .await
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible");
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, json)
    }
}
