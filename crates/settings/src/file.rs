//! TOML config file support.
//!
//! Config location: `~/.config/nexus/config.toml`

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants;

/// User-facing config parsed from TOML.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, rename_all = "kebab-case")]
pub struct Config {
    /// Shell to launch in new tabs. Falls back to `$SHELL`.
    pub shell: Option<String>,
    /// Launch the shell as a login shell (`-l`).
    pub login_shell: bool,
    /// `TERM` exported to spawned shells.
    pub term: String,
    /// Quiescence window for the "generating" indicator, in milliseconds.
    pub generating_window_ms: u64,
    /// Reopen the tabs from the previous run on startup.
    pub restore_workspace: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            shell: None,
            login_shell: true,
            term: constants::pty::DEFAULT_TERM.to_string(),
            generating_window_ms: constants::timing::GENERATING_WINDOW.as_millis() as u64,
            restore_workspace: true,
        }
    }
}

impl Config {
    /// Quiescence window, clamped to the accepted minimum.
    pub fn generating_window(&self) -> Duration {
        Duration::from_millis(self.generating_window_ms).max(constants::timing::MIN_GENERATING_WINDOW)
    }

    /// Shell program to spawn: config value, then `$SHELL`, then the platform fallback.
    pub fn resolve_shell(&self) -> String {
        self.shell
            .clone()
            .filter(|s| !s.trim().is_empty())
            .or_else(|| std::env::var("SHELL").ok())
            .unwrap_or_else(|| constants::pty::FALLBACK_SHELL.to_string())
    }
}

/// Default config file content with comments (generated on first launch).
const DEFAULT_CONFIG: &str = r#"# Nexus Configuration

# Shell launched in new tabs (defaults to $SHELL)
# shell = "/bin/zsh"

# Start the shell as a login shell
login-shell = true

# TERM exported to spawned shells
term = "xterm-256color"

# How long a tab keeps its "generating" indicator after the last output (ms)
generating-window-ms = 100

# Reopen the tabs from the previous run on startup
restore-workspace = true
"#;

/// Return the config file path.
pub fn config_path() -> PathBuf {
    nexus_paths::config_file()
}

/// Ensure the config file exists, creating a default if missing.
/// Returns the path to the config file.
pub fn ensure_config_file() -> Option<PathBuf> {
    let path = config_path();
    if !path.exists() {
        let parent = path.parent()?;
        std::fs::create_dir_all(parent).ok()?;
        std::fs::write(&path, DEFAULT_CONFIG).ok()?;
        tracing::info!("Created default config at {:?}", path);
    }
    Some(path)
}

/// Load and parse the config file. Returns default on any error.
pub fn load_config() -> Config {
    load_config_from(&config_path())
}

/// Load and parse a config file at `path`. Returns default on any error.
pub fn load_config_from(path: &Path) -> Config {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!("Failed to read config: {}", e);
            }
            return Config::default();
        }
    };

    // Size guard
    if content.len() > constants::settings::MAX_FILE_SIZE as usize {
        tracing::warn!(
            "Config file too large ({} bytes), using defaults",
            content.len()
        );
        return Config::default();
    }

    match toml::from_str(&content) {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::warn!("Failed to parse config.toml: {}", e);
            Config::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    #[test]
    fn test_default_config_has_sane_values() {
        let cfg = Config::default();
        assert!(cfg.shell.is_none());
        assert!(cfg.login_shell);
        assert_eq!(cfg.term, "xterm-256color");
        assert_eq!(cfg.generating_window_ms, 100);
        assert!(cfg.restore_workspace);
    }

    #[test]
    fn test_parses_minimal_toml() {
        let cfg: Config = toml::from_str(r#"shell = "/bin/fish""#).unwrap();
        assert_eq!(cfg.shell.as_deref(), Some("/bin/fish"));
        assert_eq!(cfg.generating_window_ms, 100);
    }

    #[test]
    fn test_parses_full_toml() {
        let toml_str = r#"
shell = "/usr/bin/nu"
login-shell = false
term = "xterm-kitty"
generating-window-ms = 250
restore-workspace = false
"#;
        let cfg: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(
            cfg,
            Config {
                shell: Some("/usr/bin/nu".to_string()),
                login_shell: false,
                term: "xterm-kitty".to_string(),
                generating_window_ms: 250,
                restore_workspace: false,
            }
        );
    }

    #[test]
    fn test_ignores_unknown_keys() {
        let toml_str = r#"
term = "xterm"
unknown-key = "whatever"
"#;
        let result: Result<Config, _> = toml::from_str(toml_str);
        assert!(result.is_ok());
    }

    #[test]
    fn test_default_config_template_is_valid_toml() {
        let cfg: Config = toml::from_str(DEFAULT_CONFIG).unwrap();
        assert_eq!(cfg, Config::default());
    }

    #[test]
    fn test_empty_string_parses_to_defaults() {
        let cfg: Config = toml::from_str("").unwrap();
        assert_eq!(cfg, Config::default());
    }

    #[test_case(100, 100 ; "default window")]
    #[test_case(1, 10 ; "clamped to minimum")]
    #[test_case(0, 10 ; "zero clamped to minimum")]
    #[test_case(2000, 2000 ; "long window")]
    fn test_generating_window_is_clamped(configured: u64, expected_ms: u64) {
        let cfg = Config {
            generating_window_ms: configured,
            ..Config::default()
        };
        assert_eq!(cfg.generating_window(), Duration::from_millis(expected_ms));
    }

    #[test]
    fn test_resolve_shell_prefers_config_value() {
        let cfg = Config {
            shell: Some("/opt/bin/zsh".to_string()),
            ..Config::default()
        };
        assert_eq!(cfg.resolve_shell(), "/opt/bin/zsh");
    }

    #[test]
    fn test_resolve_shell_ignores_blank_config_value() {
        let cfg = Config {
            shell: Some("   ".to_string()),
            ..Config::default()
        };
        assert!(!cfg.resolve_shell().trim().is_empty());
    }

    #[test]
    fn test_load_config_from_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = load_config_from(&dir.path().join("absent.toml"));
        assert_eq!(cfg, Config::default());
    }

    #[test]
    fn test_load_config_from_invalid_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "generating-window-ms = \"soon\"").unwrap();
        assert_eq!(load_config_from(&path), Config::default());
    }

    #[test]
    fn test_load_config_from_reads_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "restore-workspace = false\n").unwrap();
        assert!(!load_config_from(&path).restore_workspace);
    }

    #[test]
    fn test_oversized_config_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let padding = "#".repeat(constants::settings::MAX_FILE_SIZE as usize + 1);
        std::fs::write(&path, format!("restore-workspace = false\n{}", padding)).unwrap();
        assert_eq!(load_config_from(&path), Config::default());
    }
}
