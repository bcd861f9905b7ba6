//! Tracing subscriber initialization.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LogFormat;
use crate::error::{ApiError, ApiResult};

/// Install the global subscriber. `RUST_LOG` wins over `level`.
///
/// Must be called once, before anything logs. A second call fails.
pub fn init_tracing(level: &str, format: LogFormat) -> ApiResult<()> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(level).map_err(|e| {
            ApiError::internal_error(format!("Invalid log level '{}': {}", level, e))
        })?,
    };

    let registry = tracing_subscriber::registry().with(env_filter);
    let result = match format {
        LogFormat::Json => registry.with(fmt::layer().json()).try_init(),
        LogFormat::Pretty => registry.with(fmt::layer().pretty()).try_init(),
    };
    result.map_err(|e| ApiError::internal_error(format!("Failed to init subscriber: {}", e)))?;

    tracing::info!(
        log_level = level,
        log_format = ?format,
        version = env!("CARGO_PKG_VERSION"),
        "Tracing initialized"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_fails() {
        // Another test in this binary may have won the race; either way the
        // subscriber can only be installed once.
        let _ = init_tracing("info", LogFormat::Json);
        assert!(init_tracing("info", LogFormat::Pretty).is_err());
    }
}
