//! rolesync engine
//!
//! The concurrent part of rolesync: the guild Cache Store, the Chunk
//! Accumulator, the bounded Job Queue with its single Reconciliation Worker,
//! the metrics samplers, per-guild task lifecycles, event ingestion and the
//! admin operations. All I/O goes through the collaborator traits in
//! `rolesync-core`.

pub mod accumulator;
pub mod admin;
pub mod cache;
pub mod config;
pub mod context;
pub mod ingest;
pub mod lifecycle;
pub mod queue;
pub mod retry;
pub mod sampler;
pub mod worker;

pub use accumulator::ChunkAccumulator;
pub use admin::AdminService;
pub use cache::{CacheStore, MembershipSet, PresenceSet};
pub use config::{EngineConfig, Messages};
pub use context::EngineContext;
pub use ingest::EventIngestor;
pub use lifecycle::{GuildRegistry, GuildTasks};
pub use queue::{job_queue, JobReceiver, JobSubmitter};
pub use retry::RetryPolicy;
pub use sampler::{
    trigger_resync, GlobalSampler, GuildSampler, GuildTally, NoProcessProbe, ProcessProbe,
    ProcessStats,
};
pub use worker::{ReconciliationWorker, WorkerMetrics, WorkerSnapshot};
