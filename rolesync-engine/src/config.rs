//! Engine configuration.

use crate::retry::RetryPolicy;
use rolesync_core::{
    DEFAULT_METRICS_INTERVAL_SECS, DEFAULT_QUEUE_CAPACITY, DEFAULT_RESYNC_INTERVAL_SECS,
    PLATFORM_CHUNK_SIZE,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

// ============================================================================
// ENGINE CONFIG
// ============================================================================

/// Tuning for the queue, worker and periodic tasks.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Job Queue capacity (default: 1000)
    pub queue_capacity: usize,

    /// Platform enumeration chunk size; a shorter chunk ends an enumeration
    /// (default: 1000)
    pub chunk_size: usize,

    /// Period of the global and per-guild metrics samplers (default: 10 seconds)
    pub metrics_interval: Duration,

    /// Period of the per-guild full-membership resync (default: 300 seconds)
    pub resync_interval: Duration,

    /// Retry policy for individual platform calls
    pub retry: RetryPolicy,

    /// User-facing texts
    pub messages: Messages,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            chunk_size: PLATFORM_CHUNK_SIZE,
            metrics_interval: Duration::from_secs(DEFAULT_METRICS_INTERVAL_SECS),
            resync_interval: Duration::from_secs(DEFAULT_RESYNC_INTERVAL_SECS),
            retry: RetryPolicy::default(),
            messages: Messages::default(),
        }
    }
}

impl EngineConfig {
    /// Short intervals for local runs against a test guild.
    pub fn development() -> Self {
        Self {
            metrics_interval: Duration::from_secs(5),
            resync_interval: Duration::from_secs(60),
            retry: RetryPolicy::none(),
            ..Self::default()
        }
    }

    pub fn production() -> Self {
        Self {
            retry: RetryPolicy {
                max_attempts: 5,
                ..RetryPolicy::default()
            },
            ..Self::default()
        }
    }
}

// ============================================================================
// MESSAGES
// ============================================================================

/// Texts sent to members by the worker and the ingest path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Messages {
    /// Sent when a refresh finds no linked account.
    pub not_linked: String,
    /// Sent after a successful refresh.
    pub synced: String,
    /// Sent when a member is newly promoted to the player role.
    pub new_player: String,
}

impl Default for Messages {
    fn default() -> Self {
        Self {
            not_linked: "You did not link your discord on the homepage yet.\n\
                Head to https://heroesawaken.com/profile/link/discord to link your Account! :)"
                .to_string(),
            synced: "We successfully synced your roles!".to_string(),
            new_player: "Gratulations! You are now a Player!\n\
                Please head over to the #player-changelog channel and read up on how to get started!\n\n\
                See you on the Battlefield!"
                .to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.queue_capacity, 1000);
        assert_eq!(config.chunk_size, 1000);
        assert_eq!(config.metrics_interval, Duration::from_secs(10));
        assert_eq!(config.resync_interval, Duration::from_secs(300));
    }

    #[test]
    fn test_development_disables_retries() {
        assert_eq!(EngineConfig::development().retry.max_attempts, 1);
    }

    #[test]
    fn test_messages_partial_override() -> Result<(), serde_json::Error> {
        let messages: Messages = serde_json::from_str(r#"{"synced":"done"}"#)?;
        assert_eq!(messages.synced, "done");
        assert_eq!(messages.not_linked, Messages::default().not_linked);
        Ok(())
    }
}
