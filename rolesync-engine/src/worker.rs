//! Reconciliation Worker
//!
//! The single consumer of the Job Queue. It runs exactly one job at a time;
//! that is what keeps role grants and datastore writes free of cross-job
//! races. For each job it:
//!
//! 1. Rebuilds the guild's Presence Set from the live platform state
//! 2. Dispatches on the job variant (bulk-enumerate, sync-one, sync-all)
//!
//! A failed datastore query aborts the job with a log line. A failed grant
//! inside a job is logged and the remaining grants still run.

use crate::context::EngineContext;
use crate::queue::JobReceiver;
use rolesync_core::{
    ChannelId, DatastoreError, GrantTally, GuildId, Job, MemberChunk, MemberId, RoleSlug,
    SyncAllReport, SyncOutcome,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

// ============================================================================
// METRICS
// ============================================================================

/// Counters for worker activity since startup.
#[derive(Debug, Default)]
pub struct WorkerMetrics {
    pub jobs_processed: AtomicU64,
    pub jobs_aborted: AtomicU64,
    pub grants_issued: AtomicU64,
    pub grants_failed: AtomicU64,
    pub enumerations_published: AtomicU64,
    pub presence_refresh_errors: AtomicU64,
}

impl WorkerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> WorkerSnapshot {
        WorkerSnapshot {
            jobs_processed: self.jobs_processed.load(Ordering::Relaxed),
            jobs_aborted: self.jobs_aborted.load(Ordering::Relaxed),
            grants_issued: self.grants_issued.load(Ordering::Relaxed),
            grants_failed: self.grants_failed.load(Ordering::Relaxed),
            enumerations_published: self.enumerations_published.load(Ordering::Relaxed),
            presence_refresh_errors: self.presence_refresh_errors.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`WorkerMetrics`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSnapshot {
    pub jobs_processed: u64,
    pub jobs_aborted: u64,
    pub grants_issued: u64,
    pub grants_failed: u64,
    pub enumerations_published: u64,
    pub presence_refresh_errors: u64,
}

// ============================================================================
// WORKER
// ============================================================================

pub struct ReconciliationWorker {
    ctx: EngineContext,
    receiver: JobReceiver,
    metrics: Arc<WorkerMetrics>,
}

impl ReconciliationWorker {
    pub fn new(ctx: EngineContext, receiver: JobReceiver) -> Self {
        Self {
            ctx,
            receiver,
            metrics: Arc::new(WorkerMetrics::new()),
        }
    }

    pub fn metrics(&self) -> Arc<WorkerMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Take and process jobs until shutdown, then drain what is already
    /// queued. New submissions are refused from the moment shutdown is seen.
    pub async fn run(mut self, mut shutdown_rx: watch::Receiver<bool>) -> Arc<WorkerMetrics> {
        tracing::info!(
            capacity = self.ctx.submitter.max_capacity(),
            "Reconciliation worker started"
        );

        loop {
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        tracing::info!("Reconciliation worker shutting down");
                        break;
                    }
                }

                job = self.receiver.take() => match job {
                    Some(job) => self.process(job).await,
                    None => break,
                },
            }
        }

        self.receiver.close();
        let mut drained = 0u64;
        while let Some(job) = self.receiver.take().await {
            self.process(job).await;
            drained += 1;
        }

        let snapshot = self.metrics.snapshot();
        tracing::info!(
            drained,
            jobs_processed = snapshot.jobs_processed,
            jobs_aborted = snapshot.jobs_aborted,
            grants_issued = snapshot.grants_issued,
            grants_failed = snapshot.grants_failed,
            "Reconciliation worker stopped"
        );

        self.metrics
    }

    /// Reconcile one job to completion.
    pub async fn process(&self, job: Job) {
        tracing::debug!(
            kind = %job.kind(),
            guild_id = %job.guild_id(),
            queued = self.ctx.submitter.len(),
            "Processing job"
        );

        self.refresh_presences(job.guild_id()).await;

        match job {
            Job::BulkEnumerate { guild_id, chunk } => {
                self.bulk_enumerate(&guild_id, chunk);
            }
            Job::SyncOne {
                guild_id,
                identity,
                reply_channel,
            } => match self.sync_one(&guild_id, &identity).await {
                Ok(outcome) => {
                    self.report_sync_one(&identity, reply_channel.as_ref(), outcome)
                        .await
                }
                Err(e) => {
                    self.metrics.jobs_aborted.fetch_add(1, Ordering::Relaxed);
                    tracing::error!(
                        guild_id = %guild_id,
                        member_id = %identity,
                        error = %e,
                        "Sync-one aborted"
                    );
                }
            },
            Job::SyncAll { guild_id } => {
                if let Err(e) = self.sync_all(&guild_id).await {
                    self.metrics.jobs_aborted.fetch_add(1, Ordering::Relaxed);
                    tracing::error!(guild_id = %guild_id, error = %e, "Sync-all aborted");
                }
            }
        }

        self.metrics.jobs_processed.fetch_add(1, Ordering::Relaxed);
    }

    /// Replace the guild's Presence Set with the platform's current view.
    /// On failure the previous set is kept and the job still runs.
    async fn refresh_presences(&self, guild: &GuildId) {
        match self.ctx.platform.guild_snapshot(guild).await {
            Ok(snapshot) => {
                self.ctx
                    .cache
                    .replace_presences(guild, snapshot.presence_map());
            }
            Err(e) => {
                self.metrics
                    .presence_refresh_errors
                    .fetch_add(1, Ordering::Relaxed);
                tracing::warn!(guild_id = %guild, error = %e, "Presence snapshot unavailable");
            }
        }
    }

    /// Stage a chunk; publish the Membership Set when it is the final one.
    /// Returns the published member count.
    pub fn bulk_enumerate(&self, guild: &GuildId, chunk: MemberChunk) -> Option<usize> {
        let received = chunk.len();
        let published = self.ctx.accumulator.accept(guild, chunk)?;
        let total = published.len();
        self.ctx.cache.publish_membership(guild, published);
        self.metrics
            .enumerations_published
            .fetch_add(1, Ordering::Relaxed);
        tracing::info!(
            guild_id = %guild,
            last_chunk = received,
            total_members = total,
            "Membership enumeration published"
        );
        Some(total)
    }

    /// Grant every mapped platform role for the identity's linked account.
    pub async fn sync_one(
        &self,
        guild: &GuildId,
        identity: &MemberId,
    ) -> Result<SyncOutcome, DatastoreError> {
        let slugs = match self.ctx.datastore.roles_for_identity(identity).await {
            Ok(slugs) => slugs,
            Err(e) if e.is_not_found() => {
                tracing::debug!(guild_id = %guild, member_id = %identity, "No linked account");
                return Ok(SyncOutcome::NotLinked);
            }
            Err(e) => return Err(e),
        };

        let tally = self.grant_slugs(guild, identity, &slugs).await;
        tracing::debug!(
            guild_id = %guild,
            member_id = %identity,
            granted = tally.granted,
            unmapped = tally.unmapped,
            failed = tally.failed,
            "Sync-one completed"
        );
        Ok(SyncOutcome::Synced(tally))
    }

    /// Grant mapped roles for every linked account.
    pub async fn sync_all(&self, guild: &GuildId) -> Result<SyncAllReport, DatastoreError> {
        let accounts = self.ctx.datastore.linked_accounts().await?;

        let mut report = SyncAllReport::default();
        for account in accounts {
            let tally = self
                .grant_slugs(guild, &account.identity, &account.slugs())
                .await;
            report.grants.merge(tally);
            report.accounts += 1;
        }

        tracing::info!(
            guild_id = %guild,
            accounts = report.accounts,
            granted = report.grants.granted,
            failed = report.grants.failed,
            "Sync-all completed"
        );
        Ok(report)
    }

    async fn grant_slugs(
        &self,
        guild: &GuildId,
        identity: &MemberId,
        slugs: &[RoleSlug],
    ) -> GrantTally {
        let mut tally = GrantTally::default();

        for slug in slugs {
            let Some(role) = self.ctx.role_map.resolve(guild, slug) else {
                tally.unmapped += 1;
                continue;
            };

            tracing::debug!(
                guild_id = %guild,
                member_id = %identity,
                role_id = %role,
                "Assigning role"
            );
            let platform = &self.ctx.platform;
            let result = self
                .ctx
                .config
                .retry
                .run("grant_role", || platform.grant_role(guild, identity, role))
                .await;

            match result {
                Ok(()) => {
                    tally.granted += 1;
                    self.metrics.grants_issued.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    tally.failed += 1;
                    self.metrics.grants_failed.fetch_add(1, Ordering::Relaxed);
                    tracing::error!(
                        guild_id = %guild,
                        member_id = %identity,
                        role_id = %role,
                        error = %e,
                        "Role grant failed"
                    );
                }
            }
        }

        tally
    }

    async fn report_sync_one(
        &self,
        identity: &MemberId,
        reply_channel: Option<&ChannelId>,
        outcome: SyncOutcome,
    ) {
        let messages = &self.ctx.config.messages;
        let text = match outcome {
            SyncOutcome::NotLinked => &messages.not_linked,
            SyncOutcome::Synced(_) => &messages.synced,
        };
        self.ctx.send_to_member(identity, reply_channel, text).await;
    }
}
