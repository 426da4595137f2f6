//! Centralized path management for Nexus.
//!
//! Directories are lazily initialized and cached.

use std::path::PathBuf;
use std::sync::OnceLock;

const APP_DIR: &str = "nexus";

static CONFIG_DIR: OnceLock<PathBuf> = OnceLock::new();
static DATA_DIR: OnceLock<PathBuf> = OnceLock::new();

/// ~/.config/nexus (or platform equivalent)
pub fn config_dir() -> &'static PathBuf {
    CONFIG_DIR.get_or_init(|| {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
    })
}

/// ~/.local/share/nexus (or platform equivalent)
pub fn data_dir() -> &'static PathBuf {
    DATA_DIR.get_or_init(|| {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
    })
}

/// Config file path: config_dir()/config.toml
pub fn config_file() -> PathBuf {
    config_dir().join("config.toml")
}

/// Session and workspace blob store: data_dir()/store.json
pub fn store_file() -> PathBuf {
    data_dir().join("store.json")
}

/// Directory a new shell starts in when no working directory is usable.
pub fn home_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("/"))
}
