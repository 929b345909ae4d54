//! Raw configuration schema (as parsed from TOML)

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Raw configuration as parsed from TOML
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawConfig {
    /// Config schema version
    pub config_version: u32,

    /// Shared store backend
    #[serde(default)]
    pub store: RawStoreConfig,

    /// Admin-side controller settings
    #[serde(default)]
    pub admin: RawAdminConfig,

    /// Student-side reconciliation client settings
    #[serde(default)]
    pub client: RawClientConfig,
}

/// Store backend selection
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawStoreConfig {
    /// `memory` or `sqlite` (default: sqlite)
    pub backend: Option<String>,

    /// SQLite database file (default: data dir / invigil.db)
    pub path: Option<PathBuf>,
}

/// Admin controller settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawAdminConfig {
    /// Bounded retries for a code reservation that hits a duplicate key
    pub code_retry_limit: Option<u32>,

    /// Size of the answer index space for new sessions
    pub question_count: Option<u32>,

    /// Prefix of generated enrollment ids
    pub enrollment_prefix: Option<String>,

    /// Zero-padding width of the enrollment sequence number
    pub enrollment_width: Option<usize>,

    /// `leased` or `unguarded`
    pub start_guard: Option<String>,
}

/// Reconciliation client settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawClientConfig {
    /// Broadcast poll interval while waiting
    pub poll_interval_ms: Option<u64>,

    /// Countdown and remaining-time tick interval
    pub tick_interval_ms: Option<u64>,

    /// Length of the local countdown before the exam begins
    pub countdown_seconds: Option<u32>,
}
