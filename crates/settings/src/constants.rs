//! Centralized configuration constants for Nexus.
//!
//! Organized by the component that consumes them.

/// PTY process configuration.
pub mod pty {
    /// Columns a new process is spawned with. The presentation layer
    /// renegotiates geometry once it has measured its surface.
    pub const INITIAL_COLUMNS: u16 = 80;
    /// Rows a new process is spawned with.
    pub const INITIAL_ROWS: u16 = 24;
    /// Reader buffer size for PTY output.
    pub const READ_BUFFER_SIZE: usize = 4096;
    /// Chunks buffered per output subscriber before it starts lagging.
    pub const OUTPUT_CHANNEL_CAPACITY: usize = 256;
    /// Fallback shell when `$SHELL` is unset.
    #[cfg(target_os = "macos")]
    pub const FALLBACK_SHELL: &str = "/bin/zsh";
    /// Fallback shell when `$SHELL` is unset.
    #[cfg(not(target_os = "macos"))]
    pub const FALLBACK_SHELL: &str = "/bin/bash";
    /// Default `TERM` exported to spawned shells.
    pub const DEFAULT_TERM: &str = "xterm-256color";
}

/// Blob store keys.
pub mod store {
    /// Key holding the full session collection.
    pub const SESSIONS_KEY: &str = "sessions";
    /// Key holding the last saved workspace snapshot.
    pub const WORKSPACE_KEY: &str = "workspace";
}

/// Timing configuration.
pub mod timing {
    use std::time::Duration;

    /// Quiescence window after which a tab stops counting as generating.
    pub const GENERATING_WINDOW: Duration = Duration::from_millis(100);
    /// Lower bound accepted from the config file.
    pub const MIN_GENERATING_WINDOW: Duration = Duration::from_millis(10);
}

/// Notification channel configuration.
pub mod notifications {
    /// Messages buffered for slow listeners before the oldest are dropped.
    pub const CHANNEL_CAPACITY: usize = 32;
}

/// Session defaults.
pub mod session {
    /// Title used when the working directory has no final segment.
    pub const FALLBACK_TITLE: &str = "New Session";
}

/// Settings file validation limits.
pub mod settings {
    /// Maximum settings file size in bytes (64 KB).
    /// Settings files should be tiny; anything larger is suspicious.
    pub const MAX_FILE_SIZE: u64 = 64 * 1024;
}
