//! Daemon configuration.
//!
//! One YAML file, located with `--config <path>` or `ROLESYNC_CONFIG`
//! (default `config.yml`). Secrets and deployment addresses can be overridden
//! from the environment. Everything is validated before the process starts.

use crate::db::DbConfig;
use rolesync_core::{
    ConfigError, RoleMap, DEFAULT_METRICS_INTERVAL_SECS, DEFAULT_QUEUE_CAPACITY,
    DEFAULT_RESYNC_INTERVAL_SECS, PLATFORM_CHUNK_SIZE,
};
use rolesync_engine::{EngineConfig, Messages, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "config.yml";
pub const DEFAULT_DISCORD_API: &str = "https://discord.com/api/v10";
pub const DEFAULT_HTTP_BIND: &str = "0.0.0.0:4000";

// ============================================================================
// SECTIONS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DiscordConfig {
    /// Bot token. Usually supplied through `ROLESYNC_DISCORD_TOKEN`.
    pub token: String,
    pub api_base_url: String,
    /// Where gateway commands are forwarded. Commands are dropped when unset.
    pub gateway_bridge_url: Option<String>,
    pub request_timeout_secs: u64,
}

impl Default for DiscordConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            api_base_url: DEFAULT_DISCORD_API.to_string(),
            gateway_bridge_url: None,
            request_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HttpConfig {
    pub bind: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: DEFAULT_HTTP_BIND.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetrySection {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub multiplier: f64,
}

impl From<&RetryPolicy> for RetrySection {
    fn from(policy: &RetryPolicy) -> Self {
        Self {
            max_attempts: policy.max_attempts,
            initial_backoff_ms: policy.initial_backoff.as_millis() as u64,
            max_backoff_ms: policy.max_backoff.as_millis() as u64,
            multiplier: policy.multiplier,
        }
    }
}

impl Default for RetrySection {
    fn default() -> Self {
        Self::from(&RetryPolicy::default())
    }
}

impl RetrySection {
    pub fn to_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
            multiplier: self.multiplier,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineSection {
    pub queue_capacity: usize,
    pub chunk_size: usize,
    pub metrics_interval_secs: u64,
    pub resync_interval_secs: u64,
    pub retry: RetrySection,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            chunk_size: PLATFORM_CHUNK_SIZE,
            metrics_interval_secs: DEFAULT_METRICS_INTERVAL_SECS,
            resync_interval_secs: DEFAULT_RESYNC_INTERVAL_SECS,
            retry: RetrySection::default(),
        }
    }
}

impl From<&EngineConfig> for EngineSection {
    fn from(config: &EngineConfig) -> Self {
        Self {
            queue_capacity: config.queue_capacity,
            chunk_size: config.chunk_size,
            metrics_interval_secs: config.metrics_interval.as_secs(),
            resync_interval_secs: config.resync_interval.as_secs(),
            retry: RetrySection::from(&config.retry),
        }
    }
}

impl EngineSection {
    pub fn development() -> Self {
        Self::from(&EngineConfig::development())
    }

    pub fn production() -> Self {
        Self::from(&EngineConfig::production())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

// ============================================================================
// DAEMON CONFIG
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DaemonConfig {
    #[serde(default)]
    pub discord: DiscordConfig,
    #[serde(default)]
    pub database: DbConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub engine: EngineSection,
    /// The role map: guild id -> slug/role table. Loaded once, never changed.
    #[serde(default)]
    pub guilds: RoleMap,
    #[serde(default)]
    pub messages: Messages,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_format: LogFormat,
}

fn default_log_level() -> String {
    "rolesync_daemon=info,rolesync_engine=info,warn".to_string()
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            discord: DiscordConfig::default(),
            database: DbConfig::default(),
            http: HttpConfig::default(),
            engine: EngineSection::default(),
            guilds: RoleMap::default(),
            messages: Messages::default(),
            log_level: default_log_level(),
            log_format: LogFormat::default(),
        }
    }
}

impl DaemonConfig {
    /// Locate, read, override from the environment, and validate.
    pub fn load() -> Result<Self, ConfigError> {
        let path = config_path_from_args()
            .or_else(config_path_from_env)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
        let mut config = Self::from_path(&path)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_yaml(&contents).map_err(|e| match e {
            ConfigError::Parse { reason, .. } => ConfigError::Parse {
                path: path.display().to_string(),
                reason,
            },
            other => other,
        })
    }

    pub fn from_yaml(contents: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(contents).map_err(|e| ConfigError::Parse {
            path: "<inline>".to_string(),
            reason: e.to_string(),
        })
    }

    /// Apply `ROLESYNC_*` overrides. `lookup` is `std::env::var` outside tests.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(token) = lookup("ROLESYNC_DISCORD_TOKEN") {
            self.discord.token = token;
        }
        if let Some(password) = lookup("ROLESYNC_DB_PASSWORD") {
            self.database.password = password;
        }
        if let Some(host) = lookup("ROLESYNC_DB_HOST") {
            self.database.host = host;
        }
        if let Some(bind) = lookup("ROLESYNC_HTTP_BIND") {
            self.http.bind = bind;
        }
    }

    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.http.bind.parse().map_err(|e| ConfigError::InvalidValue {
            field: "http.bind".to_string(),
            value: self.http.bind.clone(),
            reason: format!("not a socket address: {}", e),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.discord.token.trim().is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "discord.token".to_string(),
            });
        }
        if self.discord.api_base_url.trim().is_empty() {
            return Err(invalid("discord.api_base_url", "", "must not be empty"));
        }
        if let Some(url) = &self.discord.gateway_bridge_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(invalid(
                    "discord.gateway_bridge_url",
                    url,
                    "must be an http(s) URL",
                ));
            }
        }
        if self.discord.request_timeout_secs == 0 {
            return Err(invalid("discord.request_timeout_secs", "0", "must be > 0"));
        }

        if self.database.host.trim().is_empty() {
            return Err(invalid("database.host", "", "must not be empty"));
        }
        if self.database.max_size == 0 {
            return Err(invalid("database.max_size", "0", "must be > 0"));
        }

        self.bind_addr()?;

        let engine = &self.engine;
        if engine.queue_capacity == 0 {
            return Err(invalid("engine.queue_capacity", "0", "must be > 0"));
        }
        if engine.chunk_size == 0 {
            return Err(invalid("engine.chunk_size", "0", "must be > 0"));
        }
        if engine.metrics_interval_secs == 0 {
            return Err(invalid("engine.metrics_interval_secs", "0", "must be > 0"));
        }
        if engine.resync_interval_secs == 0 {
            return Err(invalid("engine.resync_interval_secs", "0", "must be > 0"));
        }
        if engine.retry.max_attempts == 0 {
            return Err(invalid("engine.retry.max_attempts", "0", "must be >= 1"));
        }
        if engine.retry.multiplier < 1.0 {
            return Err(invalid(
                "engine.retry.multiplier",
                &engine.retry.multiplier.to_string(),
                "must be >= 1.0",
            ));
        }
        if engine.retry.max_backoff_ms < engine.retry.initial_backoff_ms {
            return Err(invalid(
                "engine.retry.max_backoff_ms",
                &engine.retry.max_backoff_ms.to_string(),
                "must be >= initial_backoff_ms",
            ));
        }

        for guild in self.guilds.guild_ids() {
            let Some(roles) = self.guilds.guild(guild) else {
                continue;
            };
            if let Some(slug) = &roles.player_slug {
                if !roles.roles.contains_key(slug) {
                    return Err(invalid(
                        &format!("guilds.{}.player_slug", guild),
                        slug.as_str(),
                        "slug has no role mapping",
                    ));
                }
            }
            for slug in &roles.privileged {
                if !roles.roles.contains_key(slug) {
                    return Err(invalid(
                        &format!("guilds.{}.privileged", guild),
                        slug.as_str(),
                        "slug has no role mapping",
                    ));
                }
            }
        }

        if self.log_level.trim().is_empty() {
            return Err(invalid("log_level", "", "must not be empty"));
        }
        Ok(())
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            queue_capacity: self.engine.queue_capacity,
            chunk_size: self.engine.chunk_size,
            metrics_interval: Duration::from_secs(self.engine.metrics_interval_secs),
            resync_interval: Duration::from_secs(self.engine.resync_interval_secs),
            retry: self.engine.retry.to_policy(),
            messages: self.messages.clone(),
        }
    }
}

fn invalid(field: &str, value: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn config_path_from_env() -> Option<PathBuf> {
    std::env::var("ROLESYNC_CONFIG").ok().map(PathBuf::from)
}

fn config_path_from_args() -> Option<PathBuf> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            return args.next().map(PathBuf::from);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use rolesync_core::{GuildId, RoleId, RoleSlug};
    use std::collections::HashMap;

    const SAMPLE: &str = r#"
discord:
  token: "abc"
  gateway_bridge_url: "http://127.0.0.1:4100/commands"
database:
  host: db
  password: secret
http:
  bind: "127.0.0.1:4000"
engine:
  metrics_interval_secs: 15
  retry:
    max_attempts: 4
guilds:
  "1000":
    roles:
      tester: "R1"
      staff: "R2"
    privileged: [staff]
    player_slug: tester
messages:
  synced: "Done!"
log_format: pretty
"#;

    #[test]
    fn test_parse_sample() -> Result<(), ConfigError> {
        let config = DaemonConfig::from_yaml(SAMPLE)?;
        config.validate()?;

        assert_eq!(config.discord.api_base_url, DEFAULT_DISCORD_API);
        assert_eq!(config.database.port, 5432);
        assert_eq!(config.engine.metrics_interval_secs, 15);
        assert_eq!(config.engine.resync_interval_secs, 300);
        assert_eq!(config.engine.retry.max_attempts, 4);
        assert_eq!(config.log_format, LogFormat::Pretty);
        assert_eq!(
            config
                .guilds
                .resolve(&GuildId::from("1000"), &RoleSlug::from("staff")),
            Some(&RoleId::from("R2"))
        );
        Ok(())
    }

    #[test]
    fn test_engine_config_conversion() -> Result<(), ConfigError> {
        let engine = DaemonConfig::from_yaml(SAMPLE)?.engine_config();
        assert_eq!(engine.metrics_interval, Duration::from_secs(15));
        assert_eq!(engine.queue_capacity, 1000);
        assert_eq!(engine.retry.max_attempts, 4);
        assert_eq!(engine.messages.synced, "Done!");
        assert_eq!(engine.messages.not_linked, Messages::default().not_linked);
        Ok(())
    }

    #[test]
    fn test_env_overrides() -> Result<(), ConfigError> {
        let env: HashMap<&str, &str> = [
            ("ROLESYNC_DISCORD_TOKEN", "from-env"),
            ("ROLESYNC_DB_HOST", "pg.internal"),
            ("ROLESYNC_HTTP_BIND", "0.0.0.0:9000"),
        ]
        .into_iter()
        .collect();

        let mut config = DaemonConfig::from_yaml(SAMPLE)?;
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.discord.token, "from-env");
        assert_eq!(config.database.host, "pg.internal");
        assert_eq!(config.database.password, "secret");
        assert_eq!(config.bind_addr()?.port(), 9000);
        Ok(())
    }

    #[test]
    fn test_missing_token() {
        let config = DaemonConfig::default();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingRequired { field }) if field == "discord.token"
        ));
    }

    #[test]
    fn test_rejects_zero_queue_capacity() -> Result<(), ConfigError> {
        let mut config = DaemonConfig::from_yaml(SAMPLE)?;
        config.engine.queue_capacity = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { field, .. }) if field == "engine.queue_capacity"
        ));
        Ok(())
    }

    #[test]
    fn test_rejects_unmapped_player_slug() -> Result<(), ConfigError> {
        let yaml = SAMPLE.replace("player_slug: tester", "player_slug: ghost");
        let config = DaemonConfig::from_yaml(&yaml)?;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { field, .. }) if field == "guilds.1000.player_slug"
        ));
        Ok(())
    }

    #[test]
    fn test_rejects_bad_bind() -> Result<(), ConfigError> {
        let mut config = DaemonConfig::from_yaml(SAMPLE)?;
        config.http.bind = "localhost".to_string();
        assert!(config.validate().is_err());
        Ok(())
    }

    #[test]
    fn test_unknown_keys_rejected() {
        let result = DaemonConfig::from_yaml("discord:\n  token: x\nverbose: true\n");
        assert!(matches!(result, Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_missing_file() {
        let result = DaemonConfig::from_path(Path::new("/nonexistent/rolesync.yml"));
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn test_presets_validate() {
        for engine in [EngineSection::development(), EngineSection::production()] {
            let config = DaemonConfig {
                discord: DiscordConfig {
                    token: "t".to_string(),
                    ..DiscordConfig::default()
                },
                engine,
                ..DaemonConfig::default()
            };
            assert!(config.validate().is_ok());
        }
    }
}
