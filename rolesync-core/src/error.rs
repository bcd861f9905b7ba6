//! Error types for rolesync operations

use thiserror::Error;

/// Datastore errors.
///
/// `NotFound` is a normal outcome (e.g. an identity with no linked account);
/// `Transport` means the datastore could not be reached or the query failed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DatastoreError {
    #[error("Not found: {what}")]
    NotFound { what: String },

    #[error("Datastore transport failure: {reason}")]
    Transport { reason: String },

    #[error("Unexpected row shape in {query}: {reason}")]
    Decode { query: String, reason: String },
}

impl DatastoreError {
    pub fn not_found(what: impl Into<String>) -> Self {
        DatastoreError::NotFound { what: what.into() }
    }

    pub fn transport(reason: impl ToString) -> Self {
        DatastoreError::Transport {
            reason: reason.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, DatastoreError::NotFound { .. })
    }
}

/// Chat platform errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PlatformError {
    #[error("Not found on platform: {what}")]
    NotFound { what: String },

    #[error("Rate limited on {endpoint}, retry after {retry_after_ms}ms")]
    RateLimited {
        endpoint: String,
        retry_after_ms: u64,
    },

    #[error("Request to {endpoint} failed with status {status}: {message}")]
    Request {
        endpoint: String,
        status: u16,
        message: String,
    },

    #[error("Platform transport failure: {reason}")]
    Transport { reason: String },

    #[error("Platform unavailable: {reason}")]
    Unavailable { reason: String },
}

impl PlatformError {
    /// Whether retrying the same call might succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            PlatformError::RateLimited { .. } | PlatformError::Transport { .. } => true,
            PlatformError::Request { status, .. } => *status >= 500,
            PlatformError::NotFound { .. } | PlatformError::Unavailable { .. } => false,
        }
    }
}

/// Metrics sink errors. Always logged and dropped by callers.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MetricsError {
    #[error("Metric registration failed for {name}: {reason}")]
    Registration { name: String, reason: String },

    #[error("Label set for {name} does not match registered labels: {reason}")]
    LabelMismatch { name: String, reason: String },

    #[error("Metrics sink unavailable: {reason}")]
    Unavailable { reason: String },
}

/// Configuration errors. All of them are fatal at startup.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Failed to read config file {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("Failed to parse config file {path}: {reason}")]
    Parse { path: String, reason: String },
}

/// Validation errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    RequiredFieldMissing { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

/// Engine errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("Job queue closed")]
    QueueClosed,

    #[error("Caller {member_id} is not privileged in guild {guild_id}")]
    NotPrivileged { guild_id: String, member_id: String },

    #[error("No role mapped for slug {slug} in guild {guild_id}")]
    UnmappedRole { guild_id: String, slug: String },

    #[error("Guild {guild_id} is not configured")]
    UnknownGuild { guild_id: String },
}

/// Master error type for all rolesync errors.
#[derive(Debug, Clone, Error)]
pub enum RoleSyncError {
    #[error("Datastore error: {0}")]
    Datastore(#[from] DatastoreError),

    #[error("Platform error: {0}")]
    Platform(#[from] PlatformError),

    #[error("Metrics error: {0}")]
    Metrics(#[from] MetricsError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),
}

/// Result type alias for rolesync operations.
pub type RoleSyncResult<T> = Result<T, RoleSyncError>;

pub type DatastoreResult<T> = Result<T, DatastoreError>;

pub type PlatformResult<T> = Result<T, PlatformError>;

// =============================================================================
// TESTS
// =============================================================================
