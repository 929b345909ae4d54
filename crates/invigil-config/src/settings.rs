//! Validated settings structures

use crate::schema::{RawAdminConfig, RawClientConfig, RawConfig, RawStoreConfig};
use crate::validation::{parse_backend, parse_start_guard};
use invigil_api::DEFAULT_QUESTION_COUNT;
use invigil_util::default_store_path;
use std::path::PathBuf;
use std::time::Duration;

/// Validated settings ready for use by the controllers and clients
#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub store: StoreSettings,
    pub admin: AdminSettings,
    pub client: ClientSettings,
}

impl Settings {
    /// Convert from raw config (after validation)
    pub fn from_raw(raw: RawConfig) -> Self {
        Self {
            store: StoreSettings::from_raw(raw.store),
            admin: AdminSettings::from_raw(raw.admin),
            client: ClientSettings::from_raw(raw.client),
        }
    }
}

/// Which store implementation to open
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackendKind {
    Memory,
    Sqlite,
}

/// Store configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreSettings {
    /// Process-local store, useful for drills and tests
    Memory,
    /// SQLite-backed store shared through a file
    Sqlite { path: PathBuf },
}

impl StoreSettings {
    fn from_raw(raw: RawStoreConfig) -> Self {
        let kind = raw
            .backend
            .as_deref()
            .and_then(parse_backend)
            .unwrap_or(StoreBackendKind::Sqlite);

        match kind {
            StoreBackendKind::Memory => Self::Memory,
            StoreBackendKind::Sqlite => Self::Sqlite {
                path: raw.path.unwrap_or_else(default_store_path),
            },
        }
    }

    pub fn kind(&self) -> StoreBackendKind {
        match self {
            Self::Memory => StoreBackendKind::Memory,
            Self::Sqlite { .. } => StoreBackendKind::Sqlite,
        }
    }
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self::Sqlite {
            path: default_store_path(),
        }
    }
}

/// How a start is protected against a concurrent start of another session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StartGuard {
    /// Acquire the exclusive lease record with a compare-and-set before
    /// writing. Two racing starts cannot both succeed.
    #[default]
    Leased,
    /// Read-then-write check on the broadcast only. Two admins racing can
    /// both pass the check; the later broadcast write wins.
    Unguarded,
}

/// Admin controller settings
#[derive(Debug, Clone)]
pub struct AdminSettings {
    pub code_retry_limit: u32,
    pub question_count: u32,
    pub enrollment_prefix: String,
    pub enrollment_width: usize,
    pub start_guard: StartGuard,
}

impl AdminSettings {
    fn from_raw(raw: RawAdminConfig) -> Self {
        let defaults = Self::default();
        Self {
            code_retry_limit: raw.code_retry_limit.unwrap_or(defaults.code_retry_limit),
            question_count: raw.question_count.unwrap_or(defaults.question_count),
            enrollment_prefix: raw
                .enrollment_prefix
                .map(|p| p.to_uppercase())
                .unwrap_or(defaults.enrollment_prefix),
            enrollment_width: raw.enrollment_width.unwrap_or(defaults.enrollment_width),
            start_guard: raw
                .start_guard
                .as_deref()
                .and_then(parse_start_guard)
                .unwrap_or(defaults.start_guard),
        }
    }
}

impl Default for AdminSettings {
    fn default() -> Self {
        Self {
            code_retry_limit: 5,
            question_count: DEFAULT_QUESTION_COUNT,
            enrollment_prefix: "STU".into(),
            enrollment_width: 4,
            start_guard: StartGuard::Leased,
        }
    }
}

/// One step of the local pre-exam countdown
pub const COUNTDOWN_STEP: Duration = Duration::from_secs(1);

/// Reconciliation client settings
#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub poll_interval: Duration,
    /// Period of the remaining-time display tick
    pub tick_interval: Duration,
    /// Length of the local countdown, stepped once per [`COUNTDOWN_STEP`]
    pub countdown_seconds: u32,
}

impl ClientSettings {
    fn from_raw(raw: RawClientConfig) -> Self {
        let defaults = Self::default();
        Self {
            poll_interval: raw
                .poll_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.poll_interval),
            tick_interval: raw
                .tick_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.tick_interval),
            countdown_seconds: raw.countdown_seconds.unwrap_or(defaults.countdown_seconds),
        }
    }

    /// Total length of the countdown
    pub fn countdown(&self) -> Duration {
        COUNTDOWN_STEP * self.countdown_seconds
    }
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            tick_interval: Duration::from_millis(1000),
            countdown_seconds: 5,
        }
    }
}
