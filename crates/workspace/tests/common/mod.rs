//! Shared fixtures for workspace integration tests.
//!
//! `FakePtyProvider` stands in for real PTYs: it hands out sequential
//! process ids, records every request, can be told to fail spawns in a given
//! directory, and lets tests push output bytes into a process's stream.

// Not every test binary uses every helper.
#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast;

use nexus_workspace::{Coordinator, SessionCatalog, WorkspaceSnapshot, WorkspaceStore};
use store::MemoryStore;
use terminal::{ProcessId, PtyProvider, SpawnError, SpawnRequest, TermSize, TerminateError};

/// Store key the workspace snapshot lives under.
pub const WORKSPACE_KEY: &str = "workspace";

// ============================================================================
// Fake PTY Provider
// ============================================================================

#[derive(Default)]
struct FakeState {
    next_id: usize,
    failing: HashSet<PathBuf>,
    live: HashMap<ProcessId, broadcast::Sender<Vec<u8>>>,
    spawned: Vec<SpawnRequest>,
    terminated: Vec<ProcessId>,
    written: Vec<(ProcessId, Vec<u8>)>,
}

#[derive(Default)]
pub struct FakePtyProvider {
    state: Mutex<FakeState>,
}

impl FakePtyProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every later spawn in `dir` fail.
    pub fn fail_in(&self, dir: impl AsRef<Path>) {
        self.state.lock().failing.insert(dir.as_ref().to_path_buf());
    }

    /// Push an output chunk into a live process's stream.
    pub fn emit(&self, id: &ProcessId, bytes: &[u8]) -> bool {
        self.state
            .lock()
            .live
            .get(id)
            .is_some_and(|tx| tx.send(bytes.to_vec()).is_ok())
    }

    pub fn spawn_count(&self) -> usize {
        self.state.lock().spawned.len()
    }

    pub fn spawned_dirs(&self) -> Vec<PathBuf> {
        self.state
            .lock()
            .spawned
            .iter()
            .map(|request| request.working_directory.clone())
            .collect()
    }

    pub fn live_count(&self) -> usize {
        self.state.lock().live.len()
    }

    pub fn terminated(&self) -> Vec<ProcessId> {
        self.state.lock().terminated.clone()
    }

    pub fn written(&self) -> Vec<(ProcessId, Vec<u8>)> {
        self.state.lock().written.clone()
    }
}

#[async_trait]
impl PtyProvider for FakePtyProvider {
    async fn spawn(&self, request: SpawnRequest) -> Result<ProcessId, SpawnError> {
        let mut state = self.state.lock();
        if state.failing.contains(&request.working_directory) {
            return Err(SpawnError::MissingDirectory(request.working_directory));
        }
        state.next_id += 1;
        let id = ProcessId::from(format!("P{}", state.next_id));
        let (tx, _) = broadcast::channel(64);
        state.live.insert(id.clone(), tx);
        state.spawned.push(request);
        Ok(id)
    }

    async fn terminate(&self, id: &ProcessId) -> Result<(), TerminateError> {
        let mut state = self.state.lock();
        state.terminated.push(id.clone());
        state
            .live
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| TerminateError::NotFound(id.clone()))
    }

    async fn terminate_all(&self) {
        let mut state = self.state.lock();
        let ids: Vec<ProcessId> = state.live.drain().map(|(id, _)| id).collect();
        state.terminated.extend(ids);
    }

    fn subscribe(&self, id: &ProcessId) -> Option<broadcast::Receiver<Vec<u8>>> {
        self.state.lock().live.get(id).map(|tx| tx.subscribe())
    }

    fn write(&self, id: &ProcessId, data: &[u8]) -> anyhow::Result<()> {
        let mut state = self.state.lock();
        if !state.live.contains_key(id) {
            anyhow::bail!("PTY not found: {id}");
        }
        state.written.push((id.clone(), data.to_vec()));
        Ok(())
    }

    fn resize(&self, id: &ProcessId, _size: TermSize) -> anyhow::Result<()> {
        if !self.state.lock().live.contains_key(id) {
            anyhow::bail!("PTY not found: {id}");
        }
        Ok(())
    }
}

// ============================================================================
// Test Environment
// ============================================================================

/// One "process run" of the workspace over a shared backend.
pub struct TestEnv {
    pub backend: Arc<MemoryStore>,
    pub provider: Arc<FakePtyProvider>,
    pub catalog: Arc<SessionCatalog>,
    pub coordinator: Coordinator,
    pub workspace: WorkspaceStore,
}

impl TestEnv {
    pub fn new() -> Self {
        Self::with_backend(Arc::new(MemoryStore::new()))
    }

    /// Start a fresh run over `backend`, as after a restart.
    pub fn with_backend(backend: Arc<MemoryStore>) -> Self {
        let provider = Arc::new(FakePtyProvider::new());
        let catalog = Arc::new(SessionCatalog::new(backend.clone()));
        let coordinator = Coordinator::new(provider.clone(), catalog.clone());
        let workspace = WorkspaceStore::new(backend.clone());
        Self {
            backend,
            provider,
            catalog,
            coordinator,
            workspace,
        }
    }

    /// The workspace as currently persisted.
    pub fn saved(&self) -> Option<WorkspaceSnapshot> {
        self.backend
            .snapshot(WORKSPACE_KEY)
            .map(|value| serde_json::from_value(value).expect("valid workspace snapshot"))
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}

/// Let spawned tasks (output taps, the snapshot writer) run.
pub async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}
