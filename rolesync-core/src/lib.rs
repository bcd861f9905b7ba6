//! rolesync core - domain types
//!
//! Identities, cached entities, jobs, the Role-Map, the error taxonomy and the
//! collaborator traits. No I/O lives here.

pub mod constants;
pub mod entities;
pub mod error;
pub mod event;
pub mod identity;
pub mod job;
pub mod lookup;
pub mod metrics;
pub mod role_map;
pub mod traits;

pub use constants::*;
pub use entities::{
    decode_slug_list, AccountSummary, DatastoreRole, GuildInfo, GuildSnapshot, HeroStats,
    LinkedAccount, Member, Presence, PresenceStatus, RoleInfo,
};
pub use error::{
    ConfigError, DatastoreError, DatastoreResult, EngineError, MetricsError, PlatformError,
    PlatformResult, RoleSyncError, RoleSyncResult, ValidationError,
};
pub use event::PlatformEvent;
pub use identity::{ChannelId, GuildId, MemberId, RoleId, RoleSlug};
pub use job::{GrantTally, Job, JobKind, MemberChunk, SyncAllReport, SyncOutcome};
pub use lookup::{IdentityQuery, LookupKind};
pub use metrics::{MetricSample, GUILD_SERIES, GUILD_TAG, SERVER_SERIES};
pub use role_map::{GuildRoles, RoleMap};
pub use traits::{Datastore, MetricsSink, PlatformClient};
