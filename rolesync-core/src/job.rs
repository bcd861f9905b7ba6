//! Reconciliation jobs and their outcomes.

use crate::entities::Member;
use crate::identity::{ChannelId, GuildId, MemberId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One delivery of a chunked membership enumeration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberChunk {
    pub members: Vec<Member>,
    /// Set when this chunk closes the enumeration.
    pub is_final: bool,
    /// Enumeration cycle the chunk was received in. Chunks from a cycle that
    /// has since been reset are discarded when staged.
    #[serde(default)]
    pub generation: u64,
}

impl MemberChunk {
    /// Build a chunk from a platform delivery, applying the size heuristic:
    /// a chunk strictly shorter than `chunk_size` is the last one.
    ///
    /// A guild whose member count is an exact multiple of `chunk_size` never
    /// produces a short chunk, so its enumeration stays staged until the next
    /// cycle replaces it. This is an accepted approximation.
    pub fn from_delivery(members: Vec<Member>, chunk_size: usize, generation: u64) -> Self {
        let is_final = members.len() < chunk_size;
        Self {
            members,
            is_final,
            generation,
        }
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// Work item for the reconciliation worker. Immutable once enqueued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Job {
    /// Stage one membership chunk; publish on the final chunk.
    BulkEnumerate { guild_id: GuildId, chunk: MemberChunk },
    /// Converge one identity's platform roles toward its linked-account record.
    SyncOne {
        guild_id: GuildId,
        identity: MemberId,
        /// Fallback channel for the result message when a DM cannot be sent.
        reply_channel: Option<ChannelId>,
    },
    /// Converge every linked account.
    SyncAll { guild_id: GuildId },
}

impl Job {
    pub fn sync_one(guild_id: impl Into<GuildId>, identity: impl Into<MemberId>) -> Self {
        Job::SyncOne {
            guild_id: guild_id.into(),
            identity: identity.into(),
            reply_channel: None,
        }
    }

    pub fn sync_all(guild_id: impl Into<GuildId>) -> Self {
        Job::SyncAll {
            guild_id: guild_id.into(),
        }
    }

    pub fn bulk_enumerate(guild_id: impl Into<GuildId>, chunk: MemberChunk) -> Self {
        Job::BulkEnumerate {
            guild_id: guild_id.into(),
            chunk,
        }
    }

    pub fn guild_id(&self) -> &GuildId {
        match self {
            Job::BulkEnumerate { guild_id, .. }
            | Job::SyncOne { guild_id, .. }
            | Job::SyncAll { guild_id } => guild_id,
        }
    }

    pub fn kind(&self) -> JobKind {
        match self {
            Job::BulkEnumerate { .. } => JobKind::BulkEnumerate,
            Job::SyncOne { .. } => JobKind::SyncOne,
            Job::SyncAll { .. } => JobKind::SyncAll,
        }
    }
}

/// Discriminant of [`Job`], used for logging and counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    BulkEnumerate,
    SyncOne,
    SyncAll,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::BulkEnumerate => "bulk_enumerate",
            JobKind::SyncOne => "sync_one",
            JobKind::SyncAll => "sync_all",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tally of role grants issued during one reconciliation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantTally {
    /// Grants the platform accepted.
    pub granted: usize,
    /// Slugs with no Role-Map entry for the guild; skipped silently.
    pub unmapped: usize,
    /// Grants the platform rejected after retries.
    pub failed: usize,
}

impl GrantTally {
    pub fn merge(&mut self, other: GrantTally) {
        self.granted += other.granted;
        self.unmapped += other.unmapped;
        self.failed += other.failed;
    }
}

/// Result of a sync-one reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SyncOutcome {
    /// No linked-account record exists for the identity.
    NotLinked,
    /// A record exists; it may still have matched zero roles.
    Synced(GrantTally),
}

/// Result of a sync-all reconciliation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncAllReport {
    /// Linked accounts processed.
    pub accounts: usize,
    pub grants: GrantTally,
}
