//! Configuration validation

use crate::schema::{RawAdminConfig, RawClientConfig, RawConfig, RawStoreConfig};
use thiserror::Error;

/// Validation error
#[derive(Debug, Clone, Error)]
pub enum ValidationError {
    #[error("[{section}] {field}: {message}")]
    FieldError {
        section: &'static str,
        field: &'static str,
        message: String,
    },

    #[error("Unknown store backend '{0}' (expected 'memory' or 'sqlite')")]
    UnknownBackend(String),

    #[error("Unknown start guard '{0}' (expected 'leased' or 'unguarded')")]
    UnknownStartGuard(String),
}

fn field_error(section: &'static str, field: &'static str, message: impl Into<String>) -> ValidationError {
    ValidationError::FieldError {
        section,
        field,
        message: message.into(),
    }
}

/// Validate a raw configuration, collecting every problem
pub fn validate_config(config: &RawConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    errors.extend(validate_store(&config.store));
    errors.extend(validate_admin(&config.admin));
    errors.extend(validate_client(&config.client));
    errors
}

fn validate_store(store: &RawStoreConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if let Some(backend) = &store.backend
        && parse_backend(backend).is_none()
    {
        errors.push(ValidationError::UnknownBackend(backend.clone()));
    }

    if let Some(path) = &store.path
        && path.as_os_str().is_empty()
    {
        errors.push(field_error("store", "path", "cannot be empty"));
    }

    errors
}

fn validate_admin(admin: &RawAdminConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if admin.code_retry_limit == Some(0) {
        errors.push(field_error("admin", "code_retry_limit", "must be at least 1"));
    }

    if admin.question_count == Some(0) {
        errors.push(field_error("admin", "question_count", "must be at least 1"));
    }

    if let Some(prefix) = &admin.enrollment_prefix {
        if prefix.is_empty() {
            errors.push(field_error("admin", "enrollment_prefix", "cannot be empty"));
        } else if !prefix.chars().all(|c| c.is_ascii_alphabetic()) {
            errors.push(field_error(
                "admin",
                "enrollment_prefix",
                "must contain only ASCII letters",
            ));
        }
    }

    if let Some(width) = admin.enrollment_width
        && !(1..=9).contains(&width)
    {
        errors.push(field_error("admin", "enrollment_width", "must be between 1 and 9"));
    }

    if let Some(guard) = &admin.start_guard
        && parse_start_guard(guard).is_none()
    {
        errors.push(ValidationError::UnknownStartGuard(guard.clone()));
    }

    errors
}

fn validate_client(client: &RawClientConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if client.poll_interval_ms == Some(0) {
        errors.push(field_error("client", "poll_interval_ms", "must be positive"));
    }

    if client.tick_interval_ms == Some(0) {
        errors.push(field_error("client", "tick_interval_ms", "must be positive"));
    }

    if client.countdown_seconds == Some(0) {
        errors.push(field_error("client", "countdown_seconds", "must be at least 1"));
    }

    errors
}

/// Parse a store backend name
pub fn parse_backend(s: &str) -> Option<crate::StoreBackendKind> {
    match s.to_lowercase().as_str() {
        "memory" => Some(crate::StoreBackendKind::Memory),
        "sqlite" => Some(crate::StoreBackendKind::Sqlite),
        _ => None,
    }
}

/// Parse a start guard name
pub fn parse_start_guard(s: &str) -> Option<crate::StartGuard> {
    match s.to_lowercase().as_str() {
        "leased" | "lease" => Some(crate::StartGuard::Leased),
        "unguarded" => Some(crate::StartGuard::Unguarded),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw() -> RawConfig {
        RawConfig {
            config_version: 1,
            store: Default::default(),
            admin: Default::default(),
            client: Default::default(),
        }
    }

    #[test]
    fn empty_sections_are_valid() {
        assert!(validate_config(&raw()).is_empty());
    }

    #[test]
    fn test_parse_backend() {
        assert_eq!(parse_backend("SQLite"), Some(crate::StoreBackendKind::Sqlite));
        assert_eq!(parse_backend("memory"), Some(crate::StoreBackendKind::Memory));
        assert_eq!(parse_backend("redis"), None);
    }

    #[test]
    fn test_parse_start_guard() {
        assert_eq!(parse_start_guard("leased"), Some(crate::StartGuard::Leased));
        assert_eq!(parse_start_guard("unguarded"), Some(crate::StartGuard::Unguarded));
        assert_eq!(parse_start_guard("optimistic"), None);
    }

    #[test]
    fn collects_every_error() {
        let mut config = raw();
        config.store.backend = Some("redis".into());
        config.admin.code_retry_limit = Some(0);
        config.admin.question_count = Some(0);
        config.admin.enrollment_prefix = Some("ST-U".into());
        config.client.poll_interval_ms = Some(0);

        let errors = validate_config(&config);
        assert_eq!(errors.len(), 5);
        assert!(errors.iter().any(|e| matches!(e, ValidationError::UnknownBackend(_))));
    }

    #[test]
    fn slow_tick_with_short_countdown_is_valid() {
        let mut config = raw();
        config.client.countdown_seconds = Some(1);
        config.client.tick_interval_ms = Some(2000);

        assert!(validate_config(&config).is_empty());
    }
}
