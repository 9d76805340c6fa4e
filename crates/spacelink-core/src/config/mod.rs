//! Application configuration schemas.
//!
//! All configuration structs are deserialized via the `config` crate from
//! optional TOML files and `SPACELINK__`-prefixed environment variables.
//! Each sub-module represents a logical configuration section.

pub mod logging;
pub mod realtime;

use serde::{Deserialize, Serialize};

pub use self::logging::LoggingConfig;
pub use self::realtime::RealtimeConfig;

use crate::error::AppError;

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Real-time connection and session settings.
    #[serde(default)]
    pub realtime: RealtimeConfig,
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from TOML files and the environment.
    ///
    /// Merges `config/default.toml`, an environment-specific overlay
    /// `config/{env}.toml` and environment variables prefixed with
    /// `SPACELINK__` (e.g. `SPACELINK__REALTIME__MAX_RECONNECT_ATTEMPTS=3`).
    /// Every source is optional; missing keys fall back to defaults.
    pub fn load(env: &str) -> Result<Self, AppError> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name(&format!("config/{env}")).required(false))
            .add_source(
                config::Environment::with_prefix("SPACELINK")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| AppError::configuration(format!("Failed to build config: {e}")))?;

        let app: Self = config
            .try_deserialize()
            .map_err(|e| AppError::configuration(format!("Failed to deserialize config: {e}")))?;

        app.realtime.validate()?;
        tracing::debug!(env = %env, endpoint = %app.realtime.endpoint, "Configuration loaded");
        Ok(app)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_deserialize_from_empty_document() {
        let config: AppConfig = serde_json::from_str("{}").expect("deserialize");
        assert_eq!(config.realtime.max_reconnect_attempts, 5);
        assert_eq!(config.logging.level, "info");
    }
}
