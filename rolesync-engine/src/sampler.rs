//! Metrics Sampler
//!
//! Two periodic sources of samples:
//!
//! - the global sampler: process counters, uptime and queue depth
//! - the per-guild sampler: role, status and activity tallies over the Cache
//!   Store, plus one total/online sample
//!
//! The per-guild pass reads the Membership Set under the membership lock,
//! releases it, resolves role names through the platform, then reads the
//! Presence Set under the presence lock. No lock is held across the lookups.
//!
//! Sink failures are logged and dropped.

use crate::context::EngineContext;
use crate::queue::JobSubmitter;
use rolesync_core::metrics::{field, tag};
use rolesync_core::{
    GuildId, MetricSample, MetricsSink, PresenceStatus, RoleId, GUILD_SERIES, GUILD_TAG,
    SERVER_SERIES,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

// ============================================================================
// PROCESS STATS
// ============================================================================

/// Process-level resource counters.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ProcessStats {
    pub resident_memory_bytes: f64,
    pub virtual_memory_bytes: f64,
    pub open_fds: f64,
    pub threads: f64,
}

/// Source of process counters. `None` when the platform offers none.
pub trait ProcessProbe: Send + Sync {
    fn sample(&self) -> Option<ProcessStats>;
}

/// Probe for platforms without process counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProcessProbe;

impl ProcessProbe for NoProcessProbe {
    fn sample(&self) -> Option<ProcessStats> {
        None
    }
}

fn emit(sink: &dyn MetricsSink, sample: MetricSample) {
    if let Err(e) = sink.record(&sample) {
        tracing::warn!(series = %sample.series, error = %e, "Failed to record metric");
    }
}

// ============================================================================
// GLOBAL SAMPLER
// ============================================================================

pub struct GlobalSampler {
    sink: Arc<dyn MetricsSink>,
    probe: Arc<dyn ProcessProbe>,
    submitter: JobSubmitter,
    started: Instant,
    interval: Duration,
}

impl GlobalSampler {
    pub fn new(
        sink: Arc<dyn MetricsSink>,
        probe: Arc<dyn ProcessProbe>,
        submitter: JobSubmitter,
        interval: Duration,
    ) -> Self {
        Self {
            sink,
            probe,
            submitter,
            started: Instant::now(),
            interval,
        }
    }

    /// Emit one `scope=global` sample.
    pub fn sample_once(&self) -> MetricSample {
        let mut sample = MetricSample::new(SERVER_SERIES)
            .tag("metric", tag::SERVER)
            .tag("scope", "global")
            .tag("server", "global")
            .field(field::UPTIME_SECONDS, self.started.elapsed().as_secs_f64())
            .field(field::QUEUE_DEPTH, self.submitter.len() as f64);

        if let Some(stats) = self.probe.sample() {
            sample = sample
                .field(field::RESIDENT_MEMORY_BYTES, stats.resident_memory_bytes)
                .field(field::VIRTUAL_MEMORY_BYTES, stats.virtual_memory_bytes)
                .field(field::OPEN_FDS, stats.open_fds)
                .field(field::THREADS, stats.threads);
        }

        emit(self.sink.as_ref(), sample.clone());
        sample
    }

    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!(
            interval_secs = self.interval.as_secs(),
            "Global metrics sampler started"
        );

        loop {
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        tracing::info!("Global metrics sampler shutting down");
                        break;
                    }
                }

                _ = ticker.tick() => {
                    self.sample_once();
                }
            }
        }
    }
}

// ============================================================================
// PER-GUILD SAMPLER
// ============================================================================

/// Tallies of one per-guild pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GuildTally {
    pub total_members: usize,
    pub online_members: usize,
    /// role name (or id when unresolved) -> members holding it
    pub roles: BTreeMap<String, usize>,
    pub statuses: BTreeMap<String, usize>,
    pub games: BTreeMap<String, usize>,
}

pub struct GuildSampler {
    ctx: EngineContext,
    guild: GuildId,
    guild_name: String,
}

impl GuildSampler {
    pub fn new(ctx: EngineContext, guild: GuildId, guild_name: impl Into<String>) -> Self {
        Self {
            ctx,
            guild,
            guild_name: guild_name.into(),
        }
    }

    /// Run one sampling pass and emit its samples.
    pub async fn sample_once(&self) -> GuildTally {
        let tally = self.tally().await;
        self.emit_tally(&tally);
        self.ctx.sink.end_pass(GUILD_SERIES, &self.guild);
        tally
    }

    async fn tally(&self) -> GuildTally {
        let mut tally = GuildTally::default();

        // Membership pass: count by role id under the lock.
        let by_role_id: HashMap<RoleId, usize> =
            self.ctx.cache.with_membership(&self.guild, |set| {
                let mut counts = HashMap::new();
                if let Some(set) = set {
                    tally.total_members = set.len();
                    for member in set.values() {
                        for role in &member.roles {
                            *counts.entry(role.clone()).or_insert(0) += 1;
                        }
                    }
                }
                counts
            });

        // Resolve names with the lock released, each role looked up once per pass.
        let mut names: HashMap<RoleId, String> = HashMap::new();
        for role in by_role_id.keys() {
            let name = match self.ctx.platform.guild_role(&self.guild, role).await {
                Ok(Some(info)) => info.name,
                Ok(None) => role.to_string(),
                Err(e) => {
                    tracing::warn!(
                        guild_id = %self.guild,
                        role_id = %role,
                        error = %e,
                        "Could not resolve role"
                    );
                    role.to_string()
                }
            };
            names.insert(role.clone(), name);
        }
        for (role, count) in by_role_id {
            let name = names.remove(&role).unwrap_or_else(|| role.to_string());
            *tally.roles.entry(name).or_insert(0) += count;
        }

        // Presence pass.
        self.ctx.cache.with_presence(&self.guild, |set| {
            let Some(set) = set else {
                return;
            };
            for presence in set.values() {
                *tally
                    .statuses
                    .entry(presence.status.as_str().to_string())
                    .or_insert(0) += 1;
                if presence.status != PresenceStatus::Offline {
                    tally.online_members += 1;
                }
                if let Some(game) = &presence.activity {
                    *tally.games.entry(game.clone()).or_insert(0) += 1;
                }
            }
        });

        tally
    }

    fn emit_tally(&self, tally: &GuildTally) {
        let sink = self.ctx.sink.as_ref();
        let base = || {
            MetricSample::new(GUILD_SERIES)
                .tag("server", self.guild_name.as_str())
                .tag(GUILD_TAG, self.guild.as_str())
        };

        emit(
            sink,
            base()
                .tag("metric", tag::TOTAL)
                .field(field::TOTAL_MEMBERS, tally.total_members as f64)
                .field(field::ONLINE_MEMBERS, tally.online_members as f64),
        );

        for (role, count) in &tally.roles {
            emit(
                sink,
                base()
                    .tag("metric", tag::ROLE)
                    .tag("role", role.as_str())
                    .field(field::TOTAL_MEMBERS, *count as f64),
            );
        }

        for (status, count) in &tally.statuses {
            emit(
                sink,
                base()
                    .tag("metric", tag::STATUS)
                    .tag("status", status.as_str())
                    .field(field::MEMBERS, *count as f64),
            );
        }

        for (game, count) in &tally.games {
            emit(
                sink,
                base()
                    .tag("metric", tag::GAME)
                    .tag("game", game.as_str())
                    .field(field::MEMBERS, *count as f64),
            );
        }
    }
}

// ============================================================================
// FULL RESYNC
// ============================================================================

/// Start a new enumeration cycle: discard staged chunks and ask the platform
/// for the full member list again. Chunks arrive later through ingest.
pub async fn trigger_resync(ctx: &EngineContext, guild: &GuildId) {
    ctx.accumulator.reset(guild);
    match ctx.platform.request_full_membership(guild).await {
        Ok(()) => tracing::debug!(guild_id = %guild, "Requested full membership"),
        Err(e) => tracing::error!(guild_id = %guild, error = %e, "Membership request failed"),
    }
}
