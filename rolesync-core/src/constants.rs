//! Default tuning values.

/// Job Queue capacity; producers block once this many jobs are pending.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;

/// Members per enumeration chunk the platform delivers.
pub const PLATFORM_CHUNK_SIZE: usize = 1000;

/// Sampling period of both metrics samplers.
pub const DEFAULT_METRICS_INTERVAL_SECS: u64 = 10;

/// Period of the per-guild full-membership resync.
pub const DEFAULT_RESYNC_INTERVAL_SECS: u64 = 300;

/// Tag value used for guilds the platform reports without a name.
pub const UNKNOWN_GUILD_NAME: &str = "unknown";
