//! Chunk Accumulator: stages a chunked membership enumeration until its final
//! chunk arrives, so the Cache Store never sees a partial Membership Set.
//!
//! Chunks reach the accumulator through the Job Queue, so a reset can land
//! while chunks of the previous enumeration are still queued. Each cycle gets
//! a generation number; chunks are stamped with it on ingest and only count
//! toward the cycle they were stamped for.

use crate::cache::MembershipSet;
use rolesync_core::{GuildId, MemberChunk};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
struct Staging {
    generation: u64,
    members: MembershipSet,
}

#[derive(Debug, Default)]
struct Inner {
    /// Last generation handed out, across all guilds. Never reused, so a
    /// guild that is removed and comes back cannot match an old stamp.
    last_generation: u64,
    guilds: HashMap<GuildId, Staging>,
}

impl Inner {
    fn start_cycle(&mut self, guild: &GuildId) -> u64 {
        self.last_generation += 1;
        let generation = self.last_generation;
        self.guilds.insert(
            guild.clone(),
            Staging {
                generation,
                members: MembershipSet::new(),
            },
        );
        generation
    }
}

#[derive(Debug, Default)]
pub struct ChunkAccumulator {
    inner: Mutex<Inner>,
}

impl ChunkAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start a new enumeration cycle, discarding anything staged so far.
    /// Chunks stamped before the reset are ignored from now on.
    pub fn reset(&self, guild: &GuildId) -> u64 {
        self.inner().start_cycle(guild)
    }

    /// Generation to stamp on a chunk received now. A guild without a cycle
    /// gets one started.
    pub fn generation(&self, guild: &GuildId) -> u64 {
        let mut inner = self.inner();
        match inner.guilds.get(guild) {
            Some(staging) => staging.generation,
            None => inner.start_cycle(guild),
        }
    }

    /// Stage a chunk. Returns the complete enumeration when `chunk` is the
    /// final one; the guild's staging entry is then emptied.
    ///
    /// Chunks from another generation, or for a guild that was removed, are
    /// dropped and never close a cycle. Members are otherwise admitted
    /// unconditionally; a repeated id overwrites the earlier entry.
    pub fn accept(&self, guild: &GuildId, chunk: MemberChunk) -> Option<MembershipSet> {
        let mut inner = self.inner();
        let staged = match inner.guilds.get_mut(guild) {
            Some(staged) if staged.generation == chunk.generation => staged,
            current => {
                tracing::debug!(
                    guild_id = %guild,
                    chunk_generation = chunk.generation,
                    current_generation = ?current.map(|s| s.generation),
                    members = chunk.members.len(),
                    "Dropping chunk from a previous enumeration"
                );
                return None;
            }
        };

        for member in chunk.members {
            staged.members.insert(member.id.clone(), member);
        }

        if chunk.is_final {
            Some(std::mem::take(&mut staged.members))
        } else {
            None
        }
    }

    pub fn staged_len(&self, guild: &GuildId) -> usize {
        self.inner()
            .guilds
            .get(guild)
            .map_or(0, |staging| staging.members.len())
    }

    pub fn remove(&self, guild: &GuildId) {
        self.inner().guilds.remove(guild);
    }
}
