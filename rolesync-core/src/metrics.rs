//! Metric samples handed to a [`MetricsSink`](crate::MetricsSink).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Series for process-level samples.
pub const SERVER_SERIES: &str = "server_metrics";
/// Series for per-guild samples.
pub const GUILD_SERIES: &str = "discord_metrics";

/// Tag carrying the guild id on per-guild samples. Passes are scoped by it.
pub const GUILD_TAG: &str = "guild_id";

/// Value of the `metric` tag on each kind of sample.
pub mod tag {
    pub const SERVER: &str = "server_metrics";
    pub const TOTAL: &str = "total_members";
    pub const ROLE: &str = "role_members";
    pub const STATUS: &str = "status_members";
    pub const GAME: &str = "game_members";
}

/// Field names.
pub mod field {
    pub const TOTAL_MEMBERS: &str = "total_members";
    pub const ONLINE_MEMBERS: &str = "online_members";
    /// Member count of one status or game bucket.
    pub const MEMBERS: &str = "members";
    pub const RESIDENT_MEMORY_BYTES: &str = "resident_memory_bytes";
    pub const VIRTUAL_MEMORY_BYTES: &str = "virtual_memory_bytes";
    pub const OPEN_FDS: &str = "open_fds";
    pub const THREADS: &str = "threads";
    pub const UPTIME_SECONDS: &str = "uptime_seconds";
    pub const QUEUE_DEPTH: &str = "queue_depth";
}

/// One point: a series name, string tags and numeric fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub series: String,
    pub tags: BTreeMap<String, String>,
    pub fields: BTreeMap<String, f64>,
}

impl MetricSample {
    pub fn new(series: impl Into<String>) -> Self {
        Self {
            series: series.into(),
            ..Default::default()
        }
    }

    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn field(mut self, key: impl Into<String>, value: f64) -> Self {
        self.fields.insert(key.into(), value);
        self
    }

    pub fn tag_value(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }

    pub fn field_value(&self, key: &str) -> Option<f64> {
        self.fields.get(key).copied()
    }
}
