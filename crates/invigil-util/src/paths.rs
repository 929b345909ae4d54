//! Default paths for invigil components
//!
//! Paths are user-writable by default:
//! - Config: `$INVIGIL_CONFIG`, `$XDG_CONFIG_HOME/invigil/config.toml` or `~/.config/invigil/config.toml`
//! - Data: `$INVIGIL_DATA_DIR`, `$XDG_DATA_HOME/invigil` or `~/.local/share/invigil`

use std::path::PathBuf;

/// Environment variable for overriding the config file path
pub const INVIGIL_CONFIG_ENV: &str = "INVIGIL_CONFIG";

/// Environment variable for overriding the data directory
pub const INVIGIL_DATA_DIR_ENV: &str = "INVIGIL_DATA_DIR";

/// Application subdirectory name
const APP_DIR: &str = "invigil";

/// File name of the SQLite store inside the data directory
pub const STORE_FILENAME: &str = "invigil.db";

/// Get the default configuration file path.
pub fn default_config_path() -> PathBuf {
    if let Ok(path) = std::env::var(INVIGIL_CONFIG_ENV) {
        return PathBuf::from(path);
    }

    if let Ok(config_home) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(config_home).join(APP_DIR).join("config.toml");
    }

    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home)
            .join(".config")
            .join(APP_DIR)
            .join("config.toml");
    }

    PathBuf::from("/etc").join(APP_DIR).join("config.toml")
}

/// Get the default data directory.
///
/// Order of precedence:
/// 1. `$INVIGIL_DATA_DIR` environment variable (if set)
/// 2. `$XDG_DATA_HOME/invigil` (if XDG_DATA_HOME is set)
/// 3. `~/.local/share/invigil` (fallback)
pub fn default_data_dir() -> PathBuf {
    if let Ok(path) = std::env::var(INVIGIL_DATA_DIR_ENV) {
        return PathBuf::from(path);
    }

    data_dir_without_env()
}

/// Get the data directory without checking INVIGIL_DATA_DIR.
pub fn data_dir_without_env() -> PathBuf {
    if let Ok(data_home) = std::env::var("XDG_DATA_HOME") {
        return PathBuf::from(data_home).join(APP_DIR);
    }

    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home)
            .join(".local")
            .join("share")
            .join(APP_DIR);
    }

    // Last resort
    PathBuf::from("/tmp").join(APP_DIR).join("data")
}

/// Default location of the SQLite store
pub fn default_store_path() -> PathBuf {
    default_data_dir().join(STORE_FILENAME)
}
