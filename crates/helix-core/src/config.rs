//! Runtime configuration loaded from TOML.
//!
//! ```toml
//! [engine]
//! history_size = 50
//! slow_step_threshold_ms = 200
//!
//! [telemetry]
//! channel_capacity = 512
//!
//! [logging]
//! level = "debug"
//! json = true
//! ```
//!
//! Every field has a default; missing sections fall back to them.

use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O error reading the config file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error.
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// A value is out of range.
    #[error("Configuration validation error: {0}")]
    Validation(String),
}

/// Workflow engine settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Finished runs kept in history before the oldest is evicted.
    pub history_size: usize,
    /// Step duration above which a `low`/`medium` suggestion is raised.
    pub slow_step_threshold_ms: u64,
    /// Step duration above which the suggestion becomes `high`.
    pub critical_step_threshold_ms: u64,
    /// Timeout applied to steps that set none.
    pub default_step_timeout_ms: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            history_size: 100,
            slow_step_threshold_ms: 100,
            critical_step_threshold_ms: 500,
            default_step_timeout_ms: None,
        }
    }
}

/// Telemetry bridge settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Broadcast channel capacity; slow receivers lag past this.
    pub channel_capacity: usize,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self { channel_capacity: 256 }
    }
}

/// Log output settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by `RUST_LOG`.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), json: false }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HelixConfig {
    /// Engine settings.
    pub engine: EngineConfig,
    /// Telemetry settings.
    pub telemetry: TelemetryConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

impl HelixConfig {
    /// Loads and validates a TOML file.
    ///
    /// # Errors
    /// Returns error if the file cannot be read, parsed or validated.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        content.parse()
    }

    /// Checks value ranges.
    ///
    /// # Errors
    /// Returns [`ConfigError::Validation`] describing the first bad value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.engine.history_size == 0 {
            return Err(ConfigError::Validation("engine.history_size must be > 0".to_string()));
        }
        if self.engine.critical_step_threshold_ms < self.engine.slow_step_threshold_ms {
            return Err(ConfigError::Validation(
                "engine.critical_step_threshold_ms must be >= slow_step_threshold_ms".to_string(),
            ));
        }
        if self.engine.default_step_timeout_ms == Some(0) {
            return Err(ConfigError::Validation(
                "engine.default_step_timeout_ms must be > 0 when set".to_string(),
            ));
        }
        if self.telemetry.channel_capacity == 0 {
            return Err(ConfigError::Validation(
                "telemetry.channel_capacity must be > 0".to_string(),
            ));
        }
        if self.logging.level.trim().is_empty() {
            return Err(ConfigError::Validation("logging.level must not be empty".to_string()));
        }
        Ok(())
    }
}

impl FromStr for HelixConfig {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = HelixConfig::default();
        assert_eq!(config.engine.history_size, 100);
        assert_eq!(config.engine.slow_step_threshold_ms, 100);
        assert_eq!(config.engine.critical_step_threshold_ms, 500);
        assert_eq!(config.telemetry.channel_capacity, 256);
        assert_eq!(config.logging.level, "info");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: HelixConfig = "[engine]\nhistory_size = 5\n".parse().unwrap();
        assert_eq!(config.engine.history_size, 5);
        assert_eq!(config.engine.slow_step_threshold_ms, 100);
        assert!(!config.logging.json);
    }

    #[test]
    fn test_from_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("helix.toml");
        std::fs::write(
            &path,
            r#"
[engine]
default_step_timeout_ms = 2000

[logging]
level = "debug"
json = true
"#,
        )
        .unwrap();

        let config = HelixConfig::from_file(&path).unwrap();
        assert_eq!(config.engine.default_step_timeout_ms, Some(2000));
        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.json);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(matches!(
            "[engine]\nhistory_size = 0\n".parse::<HelixConfig>(),
            Err(ConfigError::Validation(_))
        ));
        assert!(matches!(
            "[engine]\nslow_step_threshold_ms = 900\n".parse::<HelixConfig>(),
            Err(ConfigError::Validation(_))
        ));
        assert!(matches!("engine = 3".parse::<HelixConfig>(), Err(ConfigError::TomlParse(_))));
    }

    #[test]
    fn test_missing_file() {
        let temp = TempDir::new().unwrap();
        assert!(matches!(
            HelixConfig::from_file(temp.path().join("nope.toml")),
            Err(ConfigError::Io(_))
        ));
    }
}
