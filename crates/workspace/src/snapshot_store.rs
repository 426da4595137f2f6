//! Persistence of the open-tab workspace.
//!
//! The snapshot records which sessions had tabs, in order, plus the focused
//! position. It is rewritten whenever the tab set or focus changes once the
//! coordinator is live, and read once at startup.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use settings::constants::store::WORKSPACE_KEY;
use store::BlobStore;
use util::ResultExt;

use crate::coordinator::{ChangeKind, Coordinator, CoordinatorSnapshot, Phase};
use crate::session_catalog::SessionId;
use crate::subscription::Subscription;

/// One persisted tab.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedTab {
    pub session_id: SessionId,
    pub title: String,
    pub working_directory: PathBuf,
}

/// The persisted workspace. `focused_index` is `null` when nothing had focus.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceSnapshot {
    pub tabs: Vec<PersistedTab>,
    pub focused_index: Option<usize>,
}

impl From<&CoordinatorSnapshot> for WorkspaceSnapshot {
    fn from(snapshot: &CoordinatorSnapshot) -> Self {
        Self {
            tabs: snapshot
                .tabs
                .iter()
                .map(|tab| PersistedTab {
                    session_id: tab.session_id,
                    title: tab.title.clone(),
                    working_directory: tab.working_directory.clone(),
                })
                .collect(),
            focused_index: snapshot.focused_index(),
        }
    }
}

#[derive(Clone)]
pub struct WorkspaceStore {
    store: Arc<dyn BlobStore>,
}

impl WorkspaceStore {
    pub fn new(store: Arc<dyn BlobStore>) -> Self {
        Self { store }
    }

    /// Persist the tab list and focus. Failures are logged.
    pub async fn save(&self, tabs: Vec<PersistedTab>, focused_index: Option<usize>) {
        self.write(&WorkspaceSnapshot {
            tabs,
            focused_index,
        })
        .await;
    }

    async fn write(&self, snapshot: &WorkspaceSnapshot) {
        tracing::trace!(
            "Saving workspace: {} tab(s), focus {:?}",
            snapshot.tabs.len(),
            snapshot.focused_index
        );
        store::save(self.store.as_ref(), WORKSPACE_KEY, snapshot)
            .await
            .log_err_with("Failed to save workspace");
    }

    /// Read the last saved workspace. Absent or unreadable data yields an
    /// empty workspace.
    pub async fn load(&self) -> WorkspaceSnapshot {
        match store::load::<WorkspaceSnapshot>(self.store.as_ref(), WORKSPACE_KEY).await {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => WorkspaceSnapshot::default(),
            Err(e) => {
                tracing::warn!("Failed to load workspace, starting empty: {}", e);
                WorkspaceSnapshot::default()
            }
        }
    }

    /// Save the workspace whenever the coordinator's tabs or focus change.
    ///
    /// Nothing is written until the coordinator is live. Saves run on one
    /// background task in emission order; a backlog is collapsed to the
    /// newest snapshot.
    pub fn track(&self, coordinator: &Coordinator) -> SnapshotTracker {
        let (tx, mut rx) = mpsc::unbounded_channel::<(u64, WorkspaceSnapshot)>();

        let store = self.clone();
        let writer = tokio::spawn(async move {
            let mut last_revision = None;
            while let Some(mut next) = rx.recv().await {
                while let Ok(newer) = rx.try_recv() {
                    next = newer;
                }
                let (revision, snapshot) = next;
                if last_revision.is_some_and(|last| revision <= last) {
                    continue;
                }
                last_revision = Some(revision);
                store.write(&snapshot).await;
            }
        });

        let subscription = coordinator.observe(move |change| {
            if change.snapshot.phase != Phase::Live {
                return;
            }
            if !matches!(change.kind, ChangeKind::Tabs | ChangeKind::Focus) {
                return;
            }
            let snapshot = WorkspaceSnapshot::from(&change.snapshot);
            if tx.send((change.snapshot.revision, snapshot)).is_err() {
                tracing::debug!("Workspace writer stopped, dropping snapshot");
            }
        });

        SnapshotTracker {
            subscription,
            writer,
        }
    }
}

/// Keeps the workspace saved while alive.
pub struct SnapshotTracker {
    subscription: Subscription,
    writer: JoinHandle<()>,
}

impl SnapshotTracker {
    /// Stop tracking and wait for queued saves to land.
    pub async fn flush(self) {
        drop(self.subscription);
        self.writer.await.log_err_with("Workspace writer failed");
    }
}
