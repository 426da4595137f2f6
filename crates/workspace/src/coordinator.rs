//! The single owner of live tab state.
//!
//! The coordinator ties sessions to PTY processes. It decides when a process
//! is spawned or killed, keeps the ordered list of live tabs, tracks which
//! tab has focus and which tabs are producing output, and tells observers
//! about every change.
//!
//! Locking: `open_existing`, `open_new`, `close`, `restore_workspace` and
//! `shutdown` take the async operation lock for their whole duration, so
//! they never interleave across awaits. The state mutex is only held for
//! synchronous mutation and is never held across an `.await`. Observers run
//! after the state lock is released.

use parking_lot::Mutex;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use collections::{FxHashMap, FxHashSet, IndexMap};
use settings::constants::timing::GENERATING_WINDOW;
use terminal::{ProcessId, PtyProvider, SpawnError, SpawnRequest, TermSize};

use crate::generating::GeneratingTracker;
use crate::notification::{Notification, Notifier};
use crate::session_catalog::{ProjectId, Session, SessionCatalog, SessionId};
use crate::subscription::{ObserverRegistry, Subscription};

/// A tab is identified by the process it hosts.
pub type TabId = ProcessId;

/// A live, process-backed view of a session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Tab {
    pub id: TabId,
    pub session_id: SessionId,
    pub title: String,
    pub working_directory: PathBuf,
}

/// Where the coordinator is in its startup sequence.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub enum Phase {
    /// Restoration has not started.
    #[default]
    Idle,
    /// The persisted workspace is being reopened.
    Restoring,
    /// Normal operation.
    Live,
}

/// What a [`StateChange`] touched.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChangeKind {
    /// Tabs were added or removed. Focus may have moved with them.
    Tabs,
    Focus,
    /// Only the generating set changed.
    Generating,
    Phase,
}

/// Point-in-time copy of the coordinator state.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CoordinatorSnapshot {
    /// Increases with every change.
    pub revision: u64,
    pub tabs: Vec<Tab>,
    pub focused: Option<TabId>,
    pub generating: FxHashSet<TabId>,
    pub phase: Phase,
}

impl CoordinatorSnapshot {
    /// Position of the focused tab in `tabs`.
    pub fn focused_index(&self) -> Option<usize> {
        let focused = self.focused.as_ref()?;
        self.tabs.iter().position(|tab| &tab.id == focused)
    }

    pub fn tab_for_session(&self, session_id: SessionId) -> Option<&Tab> {
        self.tabs.iter().find(|tab| tab.session_id == session_id)
    }
}

/// Delivered to observers after every mutation.
#[derive(Clone, Debug)]
pub struct StateChange {
    pub kind: ChangeKind,
    pub snapshot: CoordinatorSnapshot,
}

/// Result of [`Coordinator::open_new`].
#[derive(Clone, Debug)]
pub struct OpenedSession {
    /// The session, which stays in the catalog even if no tab was opened.
    pub session: Session,
    pub tab_id: Option<TabId>,
}

#[derive(Default)]
struct State {
    revision: u64,
    tabs: IndexMap<TabId, Tab>,
    focused: Option<TabId>,
    generating: GeneratingTracker,
    taps: FxHashMap<TabId, JoinHandle<()>>,
    phase: Phase,
}

impl State {
    fn tab_for_session(&self, session_id: SessionId) -> Option<TabId> {
        self.tabs
            .values()
            .find(|tab| tab.session_id == session_id)
            .map(|tab| tab.id.clone())
    }

    fn snapshot(&self) -> CoordinatorSnapshot {
        CoordinatorSnapshot {
            revision: self.revision,
            tabs: self.tabs.values().cloned().collect(),
            focused: self.focused.clone(),
            generating: self.generating.active().clone(),
            phase: self.phase,
        }
    }

    fn change(&mut self, kind: ChangeKind) -> StateChange {
        self.revision += 1;
        StateChange {
            kind,
            snapshot: self.snapshot(),
        }
    }
}

struct Inner {
    provider: Arc<dyn PtyProvider>,
    catalog: Arc<SessionCatalog>,
    state: Mutex<State>,
    op_lock: tokio::sync::Mutex<()>,
    observers: Arc<ObserverRegistry>,
    notifier: Notifier,
    generating_window: Duration,
}

/// Owns every live tab. Cheap to clone; clones share state.
///
/// Must be used from within a Tokio runtime: output taps and quiescence
/// timers run as tasks.
#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<Inner>,
}

impl Coordinator {
    pub fn new(provider: Arc<dyn PtyProvider>, catalog: Arc<SessionCatalog>) -> Self {
        Self::with_generating_window(provider, catalog, GENERATING_WINDOW)
    }

    pub fn with_generating_window(
        provider: Arc<dyn PtyProvider>,
        catalog: Arc<SessionCatalog>,
        generating_window: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                provider,
                catalog,
                state: Mutex::new(State::default()),
                op_lock: tokio::sync::Mutex::new(()),
                observers: Arc::new(ObserverRegistry::default()),
                notifier: Notifier::new(),
                generating_window,
            }),
        }
    }

    pub fn catalog(&self) -> &Arc<SessionCatalog> {
        &self.inner.catalog
    }

    /// Register `callback` for every state change. Dropping the returned
    /// subscription unregisters it.
    pub fn observe(&self, callback: impl Fn(&StateChange) + Send + Sync + 'static) -> Subscription {
        self.inner.observers.register(callback)
    }

    /// Listen for user-visible notifications.
    pub fn notifications(&self) -> broadcast::Receiver<Notification> {
        self.inner.notifier.subscribe()
    }

    fn emit(&self, change: Option<StateChange>) {
        if let Some(change) = change {
            self.inner.observers.emit(&change);
        }
    }

    /// Focus the tab showing `session`, spawning a process for it if none
    /// is live. Returns the tab id, or `None` if the spawn failed.
    pub async fn open_existing(&self, session: &Session) -> Option<TabId> {
        let _op = self.inner.op_lock.lock().await;

        let existing = self.inner.state.lock().tab_for_session(session.id);
        if let Some(id) = existing {
            tracing::debug!("Session {} already open in tab {}", session.id, id);
            self.set_focus(&id);
            return Some(id);
        }

        match self.spawn_tab(session, session.title.clone(), true).await {
            Ok(id) => Some(id),
            Err(e) => {
                self.report_spawn_failure(session, &e);
                None
            }
        }
    }

    /// Create a session and open a focused tab for it.
    pub async fn open_new(
        &self,
        project_id: ProjectId,
        working_directory: impl Into<PathBuf>,
        title: Option<&str>,
    ) -> OpenedSession {
        let _op = self.inner.op_lock.lock().await;

        let session = self
            .inner
            .catalog
            .create(project_id, working_directory, title)
            .await;

        let tab_id = match self.spawn_tab(&session, session.title.clone(), true).await {
            Ok(id) => Some(id),
            Err(e) => {
                self.report_spawn_failure(&session, &e);
                None
            }
        };
        OpenedSession { session, tab_id }
    }

    /// Spawn a process for `session` and append its tab. The caller must
    /// hold the operation lock.
    pub(crate) async fn spawn_tab(
        &self,
        session: &Session,
        title: String,
        focus: bool,
    ) -> Result<TabId, SpawnError> {
        let request = SpawnRequest::new(session.working_directory.clone());
        let id = self.inner.provider.spawn(request).await?;

        let tab = Tab {
            id: id.clone(),
            session_id: session.id,
            title,
            working_directory: session.working_directory.clone(),
        };

        let inserted = {
            let mut state = self.inner.state.lock();
            match state.tab_for_session(session.id) {
                Some(existing) => Err(existing),
                None => {
                    state.tabs.insert(id.clone(), tab);
                    if focus {
                        state.focused = Some(id.clone());
                    }
                    self.start_output_tap(&mut state, &id);
                    Ok(state.change(ChangeKind::Tabs))
                }
            }
        };

        match inserted {
            Ok(change) => self.emit(Some(change)),
            Err(existing) => {
                util::debug_panic!(
                    "session {} already has live tab {} while spawning {}",
                    session.id,
                    existing,
                    id
                );
                if let Err(e) = self.inner.provider.terminate(&id).await {
                    tracing::warn!("Failed to terminate duplicate PTY {}: {}", id, e);
                }
                return Ok(existing);
            }
        }

        tracing::info!(
            "Opened tab {} for session {} in {:?}",
            id,
            session.id,
            session.working_directory
        );
        Ok(id)
    }

    pub(crate) fn report_spawn_failure(&self, session: &Session, error: &SpawnError) {
        tracing::warn!("Failed to spawn PTY for session {}: {}", session.id, error);
        self.inner.notifier.send(Notification::error(format!(
            "Failed to open terminal for '{}': {}",
            session.title, error
        )));
    }

    /// Mark the tab as generating on every output chunk.
    fn start_output_tap(&self, state: &mut State, id: &TabId) {
        let Some(mut output) = self.inner.provider.subscribe(id) else {
            tracing::debug!("PTY {} has no output stream to tap", id);
            return;
        };

        let inner = Arc::downgrade(&self.inner);
        let tab_id = id.clone();
        let task = tokio::spawn(async move {
            loop {
                match output.recv().await {
                    Ok(_) | Err(RecvError::Lagged(_)) => {
                        let Some(inner) = inner.upgrade() else {
                            break;
                        };
                        Coordinator { inner }.mark_generating(&tab_id);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            tracing::trace!("Output tap for {} finished", tab_id);
        });
        if let Some(previous) = state.taps.insert(id.clone(), task) {
            previous.abort();
        }
    }

    /// Kill the tab's process and remove the tab. Termination is best
    /// effort; the tab is removed even if it fails.
    pub async fn close(&self, id: &TabId) {
        let _op = self.inner.op_lock.lock().await;

        if let Err(e) = self.inner.provider.terminate(id).await {
            tracing::warn!("Failed to terminate PTY {}: {}", id, e);
        }

        let change = {
            let mut state = self.inner.state.lock();
            let was_generating = state.generating.clear(id);
            if let Some(tap) = state.taps.remove(id) {
                tap.abort();
            }

            if state.tabs.shift_remove(id).is_some() {
                if state.focused.as_ref() == Some(id) {
                    state.focused = state.tabs.last().map(|(id, _)| id.clone());
                }
                tracing::info!("Closed tab {}", id);
                Some(state.change(ChangeKind::Tabs))
            } else if was_generating {
                Some(state.change(ChangeKind::Generating))
            } else {
                None
            }
        };
        self.emit(change);
    }

    /// Focus a live tab. Unknown ids are ignored.
    pub fn set_focus(&self, id: &TabId) {
        let change = {
            let mut state = self.inner.state.lock();
            if !state.tabs.contains_key(id) {
                tracing::debug!("Ignoring focus for unknown tab {}", id);
                return;
            }
            if state.focused.as_ref() == Some(id) {
                return;
            }
            state.focused = Some(id.clone());
            state.change(ChangeKind::Focus)
        };
        self.emit(Some(change));
    }

    /// Record output activity. The tab stays generating until no mark has
    /// arrived for the quiescence window. Ids that are not live tabs are
    /// ignored.
    pub fn mark_generating(&self, id: &TabId) {
        let change = {
            let mut state = self.inner.state.lock();
            if !state.tabs.contains_key(id) {
                return;
            }
            let (added, generation) = state.generating.mark(id);
            let task = tokio::spawn(expire_after(
                Arc::downgrade(&self.inner),
                id.clone(),
                generation,
                self.inner.generating_window,
            ));
            state.generating.arm(id.clone(), generation, task);
            added.then(|| state.change(ChangeKind::Generating))
        };
        self.emit(change);
    }

    /// Stop the indicator immediately.
    pub fn clear_generating(&self, id: &TabId) {
        let change = {
            let mut state = self.inner.state.lock();
            state
                .generating
                .clear(id)
                .then(|| state.change(ChangeKind::Generating))
        };
        self.emit(change);
    }

    fn expire_generating(&self, id: &TabId, generation: u64) {
        let change = {
            let mut state = self.inner.state.lock();
            state
                .generating
                .expire(id, generation)
                .then(|| state.change(ChangeKind::Generating))
        };
        self.emit(change);
    }

    pub fn tabs(&self) -> Vec<Tab> {
        self.inner.state.lock().tabs.values().cloned().collect()
    }

    pub fn tab(&self, id: &TabId) -> Option<Tab> {
        self.inner.state.lock().tabs.get(id).cloned()
    }

    pub fn focused(&self) -> Option<TabId> {
        self.inner.state.lock().focused.clone()
    }

    pub fn generating(&self) -> FxHashSet<TabId> {
        self.inner.state.lock().generating.active().clone()
    }

    pub fn is_generating(&self, id: &TabId) -> bool {
        self.inner.state.lock().generating.contains(id)
    }

    pub fn tab_for_session(&self, session_id: SessionId) -> Option<TabId> {
        self.inner.state.lock().tab_for_session(session_id)
    }

    pub fn is_session_generating(&self, session_id: SessionId) -> bool {
        let state = self.inner.state.lock();
        state
            .tab_for_session(session_id)
            .is_some_and(|id| state.generating.contains(&id))
    }

    pub fn phase(&self) -> Phase {
        self.inner.state.lock().phase
    }

    pub fn snapshot(&self) -> CoordinatorSnapshot {
        self.inner.state.lock().snapshot()
    }

    /// Send input to a live tab's process.
    pub fn write(&self, id: &TabId, data: &[u8]) -> anyhow::Result<()> {
        if !self.inner.state.lock().tabs.contains_key(id) {
            anyhow::bail!("no live tab {id}");
        }
        self.inner.provider.write(id, data)
    }

    /// Renegotiate a live tab's terminal geometry.
    pub fn resize(&self, id: &TabId, cols: u16, rows: u16) -> anyhow::Result<()> {
        if !self.inner.state.lock().tabs.contains_key(id) {
            anyhow::bail!("no live tab {id}");
        }
        self.inner.provider.resize(id, TermSize { cols, rows })
    }

    /// Kill every process. Tab state is left as is and no change is
    /// emitted, so the last saved workspace survives for the next start.
    pub async fn shutdown(&self) {
        let _op = self.inner.op_lock.lock().await;
        {
            let mut state = self.inner.state.lock();
            state.generating.cancel_timers();
            for (_, tap) in state.taps.drain() {
                tap.abort();
            }
        }
        self.inner.provider.terminate_all().await;
        tracing::info!("Coordinator shut down");
    }

    /// Serialize with the other lifecycle operations.
    pub(crate) async fn lock_operations(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.inner.op_lock.lock().await
    }

    /// Move from `from` to `to`. Returns false if the phase was not `from`.
    pub(crate) fn transition(&self, from: Phase, to: Phase) -> bool {
        let change = {
            let mut state = self.inner.state.lock();
            if state.phase != from {
                return false;
            }
            state.phase = to;
            state.change(ChangeKind::Phase)
        };
        tracing::debug!("Coordinator phase {:?} -> {:?}", from, to);
        self.emit(Some(change));
        true
    }

    /// Focus the tab at `index`, clamped to the last tab.
    pub(crate) fn focus_index(&self, index: usize) {
        let target = {
            let state = self.inner.state.lock();
            let clamped = index.min(state.tabs.len().saturating_sub(1));
            let target = state.tabs.get_index(clamped).map(|(id, _)| id.clone());
            target
        };
        if let Some(id) = target {
            self.set_focus(&id);
        }
    }
}

async fn expire_after(inner: Weak<Inner>, id: TabId, generation: u64, window: Duration) {
    tokio::time::sleep(window).await;
    if let Some(inner) = inner.upgrade() {
        Coordinator { inner }.expire_generating(&id, generation);
    }
}
