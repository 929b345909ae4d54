//! Configuration parsing and validation for invigil
//!
//! Supports TOML configuration with:
//! - Versioned schema
//! - Store backend selection (memory or SQLite)
//! - Admin controller knobs (code retries, question count, start guard)
//! - Client polling and countdown timing
//! - Validation that reports every problem at once

mod schema;
mod settings;
mod validation;

pub use schema::*;
pub use settings::*;
pub use validation::*;

use std::path::Path;
use thiserror::Error;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Validation failed: {errors:?}")]
    ValidationFailed { errors: Vec<ValidationError> },

    #[error("Unsupported config version: {0}")]
    UnsupportedVersion(u32),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

impl From<ConfigError> for invigil_util::InvigilError {
    fn from(e: ConfigError) -> Self {
        invigil_util::InvigilError::config(e.to_string())
    }
}

/// Load and validate configuration from a TOML file
pub fn load_config(path: impl AsRef<Path>) -> ConfigResult<Settings> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)?;
    let settings = parse_config(&content)?;
    tracing::debug!(path = %path.display(), "Loaded configuration");
    Ok(settings)
}

/// Parse and validate configuration from a TOML string
pub fn parse_config(content: &str) -> ConfigResult<Settings> {
    let raw: RawConfig = toml::from_str(content)?;

    if raw.config_version != CURRENT_CONFIG_VERSION {
        return Err(ConfigError::UnsupportedVersion(raw.config_version));
    }

    let errors = validate_config(&raw);
    if !errors.is_empty() {
        return Err(ConfigError::ValidationFailed { errors });
    }

    Ok(Settings::from_raw(raw))
}

/// Current supported config version
pub const CURRENT_CONFIG_VERSION: u32 = 1;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn parse_minimal_config() {
        let settings = parse_config("config_version = 1").unwrap();
        assert_eq!(settings.admin.code_retry_limit, 5);
        assert_eq!(settings.admin.question_count, 40);
        assert_eq!(settings.admin.start_guard, StartGuard::Leased);
        assert_eq!(settings.client.poll_interval, Duration::from_millis(500));
        assert_eq!(settings.client.countdown(), Duration::from_secs(5));
        assert_eq!(settings.store.kind(), StoreBackendKind::Sqlite);
    }

    #[test]
    fn parse_full_config() {
        let config = r#"
            config_version = 1

            [store]
            backend = "sqlite"
            path = "/srv/invigil/exams.db"

            [admin]
            code_retry_limit = 3
            question_count = 60
            enrollment_prefix = "std"
            enrollment_width = 5
            start_guard = "unguarded"

            [client]
            poll_interval_ms = 250
            tick_interval_ms = 500
            countdown_seconds = 3
        "#;

        let settings = parse_config(config).unwrap();
        assert_eq!(
            settings.store,
            StoreSettings::Sqlite {
                path: "/srv/invigil/exams.db".into()
            }
        );
        assert_eq!(settings.admin.code_retry_limit, 3);
        assert_eq!(settings.admin.question_count, 60);
        assert_eq!(settings.admin.enrollment_prefix, "STD");
        assert_eq!(settings.admin.enrollment_width, 5);
        assert_eq!(settings.admin.start_guard, StartGuard::Unguarded);
        assert_eq!(settings.client.tick_interval, Duration::from_millis(500));
        assert_eq!(settings.client.countdown_seconds, 3);
        assert_eq!(settings.client.countdown(), Duration::from_secs(3));
    }

    #[test]
    fn countdown_length_does_not_depend_on_tick() {
        let settings = parse_config(
            "config_version = 1\n[client]\ntick_interval_ms = 250\ncountdown_seconds = 5",
        )
        .unwrap();
        assert_eq!(settings.client.tick_interval, Duration::from_millis(250));
        assert_eq!(settings.client.countdown(), Duration::from_secs(5));
    }

    #[test]
    fn memory_backend_ignores_path() {
        let config = r#"
            config_version = 1
            [store]
            backend = "memory"
        "#;

        let settings = parse_config(config).unwrap();
        assert_eq!(settings.store, StoreSettings::Memory);
    }

    #[test]
    fn reject_wrong_version() {
        let result = parse_config("config_version = 99");
        assert!(matches!(result, Err(ConfigError::UnsupportedVersion(99))));
    }

    #[test]
    fn reject_invalid_values() {
        let config = r#"
            config_version = 1
            [admin]
            start_guard = "hopeful"
            question_count = 0
        "#;

        match parse_config(config) {
            Err(ConfigError::ValidationFailed { errors }) => assert_eq!(errors.len(), 2),
            other => panic!("expected validation failure, got {other:?}"),
        }
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "config_version = 1\n[store]\nbackend = \"memory\"\n").unwrap();

        let settings = load_config(&path).unwrap();
        assert_eq!(settings.store.kind(), StoreBackendKind::Memory);
    }

    #[test]
    fn missing_file_is_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = load_config(dir.path().join("absent.toml"));
        assert!(matches!(result, Err(ConfigError::ReadError(_))));
    }
}
