//! The PTY provider interface and its native implementation.

use async_trait::async_trait;
use collections::FxHashMap;
use parking_lot::Mutex;
use tokio::sync::broadcast;

use crate::pty_handler::{PtyHandler, ShellOptions};
use crate::types::{ProcessId, SpawnError, SpawnRequest, TermSize, TerminateError};

/// Spawns, addresses and terminates PTY processes.
///
/// Implementations own the processes; callers only hold [`ProcessId`]s.
#[cfg_attr(any(test, feature = "test-support"), mockall::automock)]
#[async_trait]
pub trait PtyProvider: Send + Sync {
    /// Start a shell in a new PTY.
    async fn spawn(&self, request: SpawnRequest) -> Result<ProcessId, SpawnError>;

    /// Kill a process and release its PTY. Best effort.
    async fn terminate(&self, id: &ProcessId) -> Result<(), TerminateError>;

    /// Kill every process this provider owns.
    async fn terminate_all(&self);

    /// Tap the output byte stream of a live process.
    fn subscribe(&self, id: &ProcessId) -> Option<broadcast::Receiver<Vec<u8>>>;

    /// Send input bytes to a live process.
    fn write(&self, id: &ProcessId, data: &[u8]) -> anyhow::Result<()>;

    /// Renegotiate the geometry of a live process.
    fn resize(&self, id: &ProcessId, size: TermSize) -> anyhow::Result<()>;
}

/// portable-pty backed provider.
pub struct NativePtyProvider {
    shell: ShellOptions,
    processes: Mutex<FxHashMap<ProcessId, PtyHandler>>,
}

impl NativePtyProvider {
    pub fn new(shell: ShellOptions) -> Self {
        Self {
            shell,
            processes: Mutex::new(FxHashMap::default()),
        }
    }

    /// Number of processes currently owned.
    pub fn len(&self) -> usize {
        self.processes.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl PtyProvider for NativePtyProvider {
    async fn spawn(&self, request: SpawnRequest) -> Result<ProcessId, SpawnError> {
        let shell = self.shell.clone();
        let working_directory = request.working_directory.clone();

        let handler = tokio::task::spawn_blocking(move || PtyHandler::spawn(&request, &shell))
            .await
            .map_err(|e| SpawnError::Aborted(e.to_string()))??;

        let id = ProcessId::new();
        tracing::debug!(
            "Spawned PTY {} (pid {:?}) in {:?}",
            id,
            handler.pid(),
            working_directory
        );
        self.processes.lock().insert(id.clone(), handler);
        Ok(id)
    }

    async fn terminate(&self, id: &ProcessId) -> Result<(), TerminateError> {
        let handler = self
            .processes
            .lock()
            .remove(id)
            .ok_or_else(|| TerminateError::NotFound(id.clone()))?;

        // Dropping the handler kills and reaps the child, which can block.
        tokio::task::spawn_blocking(move || drop(handler))
            .await
            .map_err(|e| TerminateError::Failed {
                id: id.clone(),
                reason: e.to_string(),
            })?;

        tracing::debug!("Terminated PTY {}", id);
        Ok(())
    }

    async fn terminate_all(&self) {
        let handlers: Vec<(ProcessId, PtyHandler)> = self.processes.lock().drain().collect();
        if handlers.is_empty() {
            return;
        }

        let count = handlers.len();
        if let Err(e) = tokio::task::spawn_blocking(move || drop(handlers)).await {
            tracing::warn!("Failed to terminate PTY processes: {}", e);
            return;
        }
        tracing::info!("Terminated {} PTY process(es)", count);
    }

    fn subscribe(&self, id: &ProcessId) -> Option<broadcast::Receiver<Vec<u8>>> {
        self.processes.lock().get(id).map(PtyHandler::subscribe)
    }

    fn write(&self, id: &ProcessId, data: &[u8]) -> anyhow::Result<()> {
        let processes = self.processes.lock();
        let handler = processes
            .get(id)
            .ok_or_else(|| anyhow::anyhow!("PTY not found: {id}"))?;
        handler.write(data)
    }

    fn resize(&self, id: &ProcessId, size: TermSize) -> anyhow::Result<()> {
        let processes = self.processes.lock();
        let handler = processes
            .get(id)
            .ok_or_else(|| anyhow::anyhow!("PTY not found: {id}"))?;
        handler.resize(size)
    }
}
