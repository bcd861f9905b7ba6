//! Per-guild periodic tasks, owned by the guild's handle.
//!
//! Each served guild gets a metrics ticker and a full-resync ticker. Both stop
//! when the handle is dropped, so replacing a guild's handle (re-join) or
//! removing it (guild unavailable) never leaks timers.

use crate::context::EngineContext;
use crate::sampler::{trigger_resync, GuildSampler};
use rolesync_core::GuildId;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Running tasks of one guild. Dropping it cancels them.
#[derive(Debug)]
pub struct GuildTasks {
    name: String,
    cancel_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl GuildTasks {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether every task has exited.
    pub fn is_finished(&self) -> bool {
        self.handles.iter().all(JoinHandle::is_finished)
    }

    /// Signal the tasks and wait for them to exit.
    pub async fn shutdown(mut self) {
        let _ = self.cancel_tx.send(true);
        for handle in std::mem::take(&mut self.handles) {
            if let Err(e) = handle.await {
                tracing::warn!(guild = %self.name, error = %e, "Guild task ended abnormally");
            }
        }
    }
}

impl Drop for GuildTasks {
    fn drop(&mut self) {
        let _ = self.cancel_tx.send(true);
    }
}

/// Guild id -> running tasks.
#[derive(Debug, Default)]
pub struct GuildRegistry {
    guilds: Mutex<HashMap<GuildId, GuildTasks>>,
}

impl GuildRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn guilds(&self) -> MutexGuard<'_, HashMap<GuildId, GuildTasks>> {
        self.guilds.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start the guild's tickers, cancelling any previous instance.
    pub fn start(&self, ctx: &EngineContext, guild: &GuildId, name: &str) {
        let (cancel_tx, cancel_rx) = watch::channel(false);

        let sampler = GuildSampler::new(ctx.clone(), guild.clone(), name);
        let metrics = tokio::spawn(metrics_ticker(
            sampler,
            ctx.config.metrics_interval,
            cancel_rx.clone(),
        ));
        let resync = tokio::spawn(resync_ticker(
            ctx.clone(),
            guild.clone(),
            ctx.config.resync_interval,
            cancel_rx,
        ));

        let tasks = GuildTasks {
            name: name.to_string(),
            cancel_tx,
            handles: vec![metrics, resync],
        };

        if self.guilds().insert(guild.clone(), tasks).is_some() {
            tracing::info!(guild_id = %guild, "Restarted guild tasks");
        } else {
            tracing::info!(guild_id = %guild, guild = %name, "Started guild tasks");
        }
    }

    /// Cancel the guild's tickers. Returns whether the guild had any.
    pub fn stop(&self, guild: &GuildId) -> bool {
        let removed = self.guilds().remove(guild);
        match removed {
            Some(tasks) => {
                tracing::info!(guild_id = %guild, guild = %tasks.name(), "Stopped guild tasks");
                true
            }
            None => false,
        }
    }

    pub fn is_active(&self, guild: &GuildId) -> bool {
        self.guilds().contains_key(guild)
    }

    pub fn active_guilds(&self) -> Vec<GuildId> {
        self.guilds().keys().cloned().collect()
    }

    pub fn guild_name(&self, guild: &GuildId) -> Option<String> {
        self.guilds().get(guild).map(|t| t.name.clone())
    }

    /// Cancel every guild's tickers and wait for them to exit.
    pub async fn stop_all(&self) {
        let all: Vec<GuildTasks> = self.guilds().drain().map(|(_, tasks)| tasks).collect();
        let count = all.len();
        for tasks in all {
            tasks.shutdown().await;
        }
        tracing::info!(guilds = count, "All guild tasks stopped");
    }
}

fn ticker(period: Duration) -> tokio::time::Interval {
    // First tick one period from now; the caller already did the initial work.
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker
}

async fn metrics_ticker(
    sampler: GuildSampler,
    period: Duration,
    mut cancel_rx: watch::Receiver<bool>,
) {
    let mut ticker = ticker(period);
    loop {
        tokio::select! {
            changed = cancel_rx.changed() => {
                if changed.is_err() || *cancel_rx.borrow() {
                    break;
                }
            }

            _ = ticker.tick() => {
                sampler.sample_once().await;
            }
        }
    }
}

async fn resync_ticker(
    ctx: EngineContext,
    guild: GuildId,
    period: Duration,
    mut cancel_rx: watch::Receiver<bool>,
) {
    let mut ticker = ticker(period);
    loop {
        tokio::select! {
            changed = cancel_rx.changed() => {
                if changed.is_err() || *cancel_rx.borrow() {
                    break;
                }
            }

            _ = ticker.tick() => {
                tracing::debug!(guild_id = %guild, "Periodic full resync");
                trigger_resync(&ctx, &guild).await;
            }
        }
    }
}
