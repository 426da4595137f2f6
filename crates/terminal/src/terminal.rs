//! PTY process management for Nexus.
//!
//! The session core only ever sees the [`PtyProvider`] interface and opaque
//! [`ProcessId`]s. [`NativePtyProvider`] is the portable-pty backed
//! implementation used by the binary.

mod provider;
mod pty_handler;
pub mod types;

pub use provider::{NativePtyProvider, PtyProvider};
#[cfg(any(test, feature = "test-support"))]
pub use provider::MockPtyProvider;
pub use pty_handler::{PtyHandler, ShellOptions};
pub use types::*;
