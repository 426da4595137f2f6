//! Nexus - session-backed terminal workspace
//!
//! Main entry point. Runs the workspace headless and takes commands on stdin.

mod control;

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use std::io::BufRead;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info};

use control::Controller;
use nexus_workspace::{Coordinator, Notification, SessionCatalog, WorkspaceStore};
use store::{BlobStore, JsonFileStore};
use terminal::{NativePtyProvider, ShellOptions};
use util::ResultExt;

/// Application startup time for performance monitoring
static STARTUP_TIME: Lazy<Instant> = Lazy::new(Instant::now);

/// Initialize required directories (cross-platform).
fn init_paths() -> Result<()> {
    let config_dir = nexus_paths::config_dir();
    let data_dir = nexus_paths::data_dir();

    std::fs::create_dir_all(config_dir)
        .with_context(|| format!("Failed to create config directory: {:?}", config_dir))?;
    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("Failed to create data directory: {:?}", data_dir))?;

    debug!(
        "Initialized paths - config: {:?}, data: {:?}",
        config_dir, data_dir
    );
    Ok(())
}

/// Check if debug mode is enabled via environment variable.
fn is_debug_mode() -> bool {
    std::env::var("NEXUS_DEBUG").is_ok()
}

/// Initialize the logging system. Logs go to stderr; stdout carries
/// command output.
fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let default_filter = if is_debug_mode() {
        "nexus=trace,nexus_workspace=trace,terminal=debug,store=debug,info"
    } else {
        "nexus=info,nexus_workspace=info,warn"
    };

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_line_number(true),
        )
        .with(filter)
        .init();

    if is_debug_mode() {
        info!(
            "Nexus v{} starting up (DEBUG MODE ENABLED)",
            env!("CARGO_PKG_VERSION")
        );
        info!("Set RUST_LOG for custom log levels, e.g. RUST_LOG=nexus_workspace=trace");
    } else {
        info!("Nexus v{} starting up", env!("CARGO_PKG_VERSION"));
    }
}

/// Read stdin on a dedicated thread so a pending read never holds up exit.
fn spawn_stdin_reader() -> Result<mpsc::UnboundedReceiver<String>> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::Builder::new()
        .name("stdin-reader".to_owned())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else {
                    break;
                };
                if tx.send(line).is_err() {
                    break;
                }
            }
        })
        .context("Failed to spawn stdin reader")?;
    Ok(rx)
}

async fn print_notifications(mut notifications: broadcast::Receiver<Notification>) {
    loop {
        match notifications.recv().await {
            Ok(notification) => println!("[{}] {}", notification.level, notification.message),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                debug!("Skipped {} notification(s)", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = *STARTUP_TIME;

    init_logging();

    if let Err(e) = init_paths() {
        error!("Failed to initialize paths: {}", e);
    }

    settings::ensure_config_file();
    let config = settings::load_config();
    debug!("Loaded config: {:?}", config);

    let backend: Arc<dyn BlobStore> = Arc::new(JsonFileStore::new(nexus_paths::store_file()));
    let catalog = Arc::new(SessionCatalog::new(backend.clone()));
    catalog.load().await;

    let provider = Arc::new(NativePtyProvider::new(ShellOptions::from_config(&config)));
    let coordinator =
        Coordinator::with_generating_window(provider, catalog, config.generating_window());
    let notifications = tokio::spawn(print_notifications(coordinator.notifications()));

    let workspace = WorkspaceStore::new(backend);
    let tracker = workspace.track(&coordinator);

    if config.restore_workspace {
        coordinator.restore_workspace(&workspace).await;
    } else {
        coordinator.skip_restoration();
    }

    info!(
        "Workspace ready in {:?}, type 'help' for commands",
        STARTUP_TIME.elapsed()
    );

    let controller = Controller::new(coordinator.clone());
    let lines = spawn_stdin_reader()?;
    let mut stdout = std::io::stdout();
    tokio::select! {
        result = controller.run(lines, &mut stdout) => {
            result.log_err();
        }
        _ = tokio::signal::ctrl_c() => info!("Interrupted"),
    }

    coordinator.shutdown().await;
    tracker.flush().await;
    notifications.abort();

    info!("Exited after {:?}", STARTUP_TIME.elapsed());
    Ok(())
}
