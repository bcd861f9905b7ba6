//! Job Queue: bounded FIFO, many producers, one consumer.
//!
//! `submit` waits for a free slot when the queue is full. There is no drop
//! policy and no cancellation; a submitted job is eventually taken.

use rolesync_core::{ChannelId, EngineError, GuildId, Job, MemberId};
use tokio::sync::mpsc;

/// Create a queue with room for `capacity` pending jobs.
pub fn job_queue(capacity: usize) -> (JobSubmitter, JobReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (JobSubmitter { tx }, JobReceiver { rx })
}

/// Producer half. Cheap to clone; every clone feeds the same FIFO.
#[derive(Debug, Clone)]
pub struct JobSubmitter {
    tx: mpsc::Sender<Job>,
}

impl JobSubmitter {
    /// Enqueue a job, waiting while the queue is full.
    pub async fn submit(&self, job: Job) -> Result<(), EngineError> {
        tracing::trace!(kind = %job.kind(), guild_id = %job.guild_id(), "Submitting job");
        self.tx.send(job).await.map_err(|_| EngineError::QueueClosed)
    }

    /// Queue a sync-one job. Returns once enqueued; no completion signal.
    pub async fn submit_sync_one(
        &self,
        guild: GuildId,
        identity: MemberId,
    ) -> Result<(), EngineError> {
        self.submit(Job::SyncOne {
            guild_id: guild,
            identity,
            reply_channel: None,
        })
        .await
    }

    /// Queue a sync-one job whose result message may fall back to `channel`.
    pub async fn submit_sync_one_with_reply(
        &self,
        guild: GuildId,
        identity: MemberId,
        channel: ChannelId,
    ) -> Result<(), EngineError> {
        self.submit(Job::SyncOne {
            guild_id: guild,
            identity,
            reply_channel: Some(channel),
        })
        .await
    }

    /// Queue a sync-all job. Returns once enqueued; no completion signal.
    pub async fn submit_sync_all(&self, guild: GuildId) -> Result<(), EngineError> {
        self.submit(Job::SyncAll { guild_id: guild }).await
    }

    /// Jobs currently waiting.
    pub fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn max_capacity(&self) -> usize {
        self.tx.max_capacity()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Consumer half, owned by the reconciliation worker.
#[derive(Debug)]
pub struct JobReceiver {
    rx: mpsc::Receiver<Job>,
}

impl JobReceiver {
    /// Wait for the next job. `None` once the queue is closed and drained.
    pub async fn take(&mut self) -> Option<Job> {
        self.rx.recv().await
    }

    /// Refuse new submissions; jobs already queued can still be taken.
    pub fn close(&mut self) {
        self.rx.close();
    }
}
