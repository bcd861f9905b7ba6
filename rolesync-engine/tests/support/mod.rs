//! Shared setup for engine integration tests.

#![allow(dead_code)]

use rolesync_engine::{job_queue, EngineConfig, EngineContext, JobReceiver, ReconciliationWorker};
use rolesync_test_utils::fixtures;
use rolesync_test_utils::{MockDatastore, MockPlatform, RecordingSink, RoleMap};
use std::sync::Arc;

pub struct Harness {
    pub ctx: EngineContext,
    pub datastore: Arc<MockDatastore>,
    pub platform: Arc<MockPlatform>,
    pub sink: Arc<RecordingSink>,
    receiver: Option<JobReceiver>,
}

impl Harness {
    pub fn new(
        role_map: RoleMap,
        datastore: MockDatastore,
        platform: MockPlatform,
        config: EngineConfig,
    ) -> Self {
        let datastore = Arc::new(datastore);
        let platform = Arc::new(platform);
        let sink = Arc::new(RecordingSink::new());
        let (submitter, receiver) = job_queue(config.queue_capacity);
        let ctx = EngineContext::new(
            role_map,
            datastore.clone(),
            platform.clone(),
            sink.clone(),
            submitter,
            config,
        );
        Self {
            ctx,
            datastore,
            platform,
            sink,
            receiver: Some(receiver),
        }
    }

    /// Fixture role map, development config, and an empty snapshot for the
    /// fixture guild.
    pub fn standard(datastore: MockDatastore) -> Self {
        Self::new(
            fixtures::role_map(),
            datastore,
            MockPlatform::new().with_snapshot(fixtures::GUILD, fixtures::snapshot(vec![], vec![])),
            EngineConfig::development(),
        )
    }

    /// The worker owning this harness's queue. Only one can be taken.
    pub fn worker(&mut self) -> ReconciliationWorker {
        let receiver = self.receiver.take().expect("worker already taken");
        ReconciliationWorker::new(self.ctx.clone(), receiver)
    }

    pub fn receiver(&mut self) -> &mut JobReceiver {
        self.receiver.as_mut().expect("receiver taken by worker")
    }
}
